use ndarray::{Array3, Axis};
use openeo_raster_datatypes::Image;

use crate::error::{self, Error};

/// Band selector accepted by `filter_bands`: either a declared band name or a
/// positional index. Name lookup requires the image to carry `band_names`.
#[derive(Debug, Clone)]
pub enum BandSelector {
    Name(String),
    Index(usize),
}

/// Selects a subset of `image`'s bands, in the order requested, carrying
/// matching band names along when the source image has them. Duplicate
/// selectors are honoured (a band may be repeated in the output).
pub fn filter_bands(image: &Image, selectors: &[BandSelector]) -> Result<Image, Error> {
    if selectors.is_empty() {
        return error::ProcessParameterInvalid {
            process_id: "filter_bands",
            parameter: "bands".to_string(),
            reason: "at least one band selector is required".to_string(),
        }
        .fail();
    }

    let indices: Vec<usize> = selectors
        .iter()
        .map(|selector| match selector {
            BandSelector::Index(i) => {
                if *i >= image.bands() {
                    return error::ProcessParameterInvalid {
                        process_id: "filter_bands",
                        parameter: "bands".to_string(),
                        reason: format!("band index {i} out of range (image has {} bands)", image.bands()),
                    }
                    .fail();
                }
                Ok(*i)
            }
            BandSelector::Name(name) => image.band_index(name),
        })
        .collect::<Result<_, Error>>()?;

    let (_, height, width) = image.data.dim();
    let mut data = Array3::zeros((indices.len(), height, width));
    let mut mask = Array3::from_elem((indices.len(), height, width), true);
    for (out_b, &src_b) in indices.iter().enumerate() {
        data.index_axis_mut(Axis(0), out_b)
            .assign(&image.data.index_axis(Axis(0), src_b));
        mask.index_axis_mut(Axis(0), out_b)
            .assign(&image.mask.index_axis(Axis(0), src_b));
    }

    let mut filtered = Image::new(data, mask, image.bounds, image.crs.clone())?;
    if let Some(band_names) = &image.band_names {
        let names: Vec<String> = indices.iter().map(|&i| band_names[i].clone()).collect();
        filtered = filtered.with_band_names(names)?;
    }
    filtered.metadata = image.metadata.clone();
    Ok(filtered)
}
