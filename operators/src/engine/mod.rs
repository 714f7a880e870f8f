pub mod dispatcher;
pub mod get_param_item;
pub mod param;

pub use dispatcher::{Dispatcher, ProcessImpl};
pub use get_param_item::get_param_item;
pub use param::{
    Arg, OpenEoType, ParamSpec, ResolvedArgs, StackValue, Value, OPTIONAL_ORCHESTRATION_KEYS,
    RESERVED_TILE_STORE_KEY, RESERVED_USER_KEY,
};
