use crate::lstsq::LeastSquaresError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeometryError {
    #[error("invalid geometry configuration: {0}")]
    InvalidConfig(String),
    #[error("calibration for laser {laser} failed")]
    Calibration {
        laser: usize,
        #[source]
        source: LeastSquaresError,
    },
    #[error("laser {0} does not exist")]
    UnknownLaser(usize),
}
