use std::sync::Arc;

use openeo_raster_datatypes::TileAssignment;

use crate::error::Error;
use crate::tile_assignment::TileAssignmentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileStageRequest {
    Claim,
    Release,
    Submit,
    ForceRelease,
}

/// Wraps a `TileAssignmentStore` with the `control_user` ownership rule:
/// when `true` (the default), `release`/`submit` act on the tile owned by
/// `user_id`; when `false`, they act on `target_user_id` regardless of who
/// is calling, for admin/orchestration flows.
#[allow(clippy::too_many_arguments)]
pub async fn tile_assignment(
    store: &Arc<dyn TileAssignmentStore>,
    stage: TileStageRequest,
    service_id: &str,
    user_id: &str,
    zoom: u32,
    x_range: (u32, u32),
    y_range: (u32, u32),
    control_user: bool,
    target_user_id: Option<&str>,
    target: Option<(u32, u32, u32)>,
) -> Result<Option<TileAssignment>, Error> {
    let acting_user = if control_user {
        user_id
    } else {
        target_user_id.unwrap_or(user_id)
    };

    match stage {
        TileStageRequest::Claim => {
            let assignment = store.claim(service_id, user_id, zoom, x_range, y_range).await?;
            Ok(Some(assignment))
        }
        TileStageRequest::Release => {
            let assignment = store.release(service_id, acting_user).await?;
            Ok(Some(assignment))
        }
        TileStageRequest::Submit => {
            let assignment = store.submit(service_id, acting_user).await?;
            Ok(Some(assignment))
        }
        TileStageRequest::ForceRelease => {
            let (x, y, z) = target.ok_or_else(|| {
                crate::error::InvalidProcessGraph {
                    reason: "force-release requires target (x, y, z)".to_string(),
                }
                .build()
            })?;
            store.force_release(service_id, x, y, z).await?;
            Ok(None)
        }
    }
}
