use liquidator_deployer::DeployerError;
use liquidator_store::StoreError;

pub type ScalerResult<T> = Result<T, ScalerError>;

#[derive(Debug, thiserror::Error)]
pub enum ScalerError {
    #[error("invalid scaler configuration: {0}")]
    InvalidConfig(String),

    #[error("queue error: {0}")]
    Queue(#[from] StoreError),

    #[error("deployer error: {0}")]
    Deployer(#[from] DeployerError),
}
