pub mod conn;
pub mod dial;

#[cfg(test)]
pub(crate) mod mock;
