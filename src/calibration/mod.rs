//! Probability calibration for margin-based classifiers

mod platt;

pub use platt::PlattScaling;
