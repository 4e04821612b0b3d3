//! Feature preprocessing applied inside a fitted pipeline

mod scaler;

pub use scaler::StandardScaler;
