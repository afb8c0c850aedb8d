mod command;
mod simulate;

pub use self::command::*;
pub use self::simulate::*;
