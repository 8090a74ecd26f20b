mod emulate;
mod fly;
mod status;

pub use emulate::{emulate, EmulatedAircraft};
pub use fly::fly;
pub use status::status;
