#[cfg(feature = "deepseek")]
pub mod deepseek;
