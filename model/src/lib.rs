mod snowflake;
pub use snowflake::Snowflake;

pub mod guild;
pub mod user;

mod util;
