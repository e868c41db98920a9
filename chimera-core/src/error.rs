//! 统一的错误处理类型
//!
//! 框架内部错误使用 thiserror 定义的枚举，业务方法（以及切面回调）使用
//! anyhow::Result，通过 `.context()` 添加上下文信息。

use thiserror::Error;

pub use anyhow::Result;

/// 容器错误
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Bean not found: {0}")]
    BeanNotFound(String),

    #[error("Bean already exists: {0}")]
    BeanAlreadyExists(String),

    #[error("Bean creation failed: {0}")]
    BeanCreationFailed(String),

    #[error("Class could not be resolved for bean '{0}'")]
    ClassNotResolved(String),

    #[error("Method '{method}' not found on class '{class}'")]
    MethodNotFound { class: String, method: String },

    #[error("Receiver type mismatch: expected {expected}")]
    ReceiverMismatch { expected: &'static str },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// 容器操作结果
pub type ContainerResult<T> = std::result::Result<T, ContainerError>;

/// 应用启动/关闭错误
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error("Failed to initialize logging: {0}")]
    LoggingInitFailed(String),

    #[error("Failed to load configuration: {0}")]
    ConfigLoadFailed(String),

    #[error("Plugin '{plugin}' failed: {source}")]
    PluginFailed {
        plugin: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// 应用操作结果
pub type ApplicationResult<T> = std::result::Result<T, ApplicationError>;
