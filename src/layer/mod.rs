mod double_conv;
mod order;
mod single_conv;

pub use double_conv::*;
pub use order::*;
pub use single_conv::*;
