//! AOP 错误类型

use chimera_core::ContainerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AopError {
    /// 宿主实例发现失败，致命错误
    #[error("Instance discovery failed: {0}")]
    Discovery(#[from] ContainerError),

    /// 方法在织入前已从原型上消失或不可调用
    #[error("Method '{method}' on class '{class}' is not callable")]
    MethodNotCallable { class: String, method: String },

    /// 织入后的方法无法写回原型
    #[error("Failed to install advised method '{method}' on class '{class}'")]
    InstallFailed { class: String, method: String },
}

pub type AopResult<T> = std::result::Result<T, AopError>;
