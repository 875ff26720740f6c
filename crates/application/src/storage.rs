//! 对象存储协作者：头像与消息附件的二进制内容上传到外部存储，核心只保留引用。

use async_trait::async_trait;
use domain::Attachment;
use thiserror::Error;

/// 单条消息允许携带的附件数量上限
pub const MAX_ATTACHMENTS: usize = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("object store rejected {file_name}: {reason}")]
    Rejected { file_name: String, reason: String },
    #[error("object store unavailable: {0}")]
    Unavailable(String),
}

/// 待上传的文件
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, file: UploadFile) -> Result<Attachment, UploadError>;
    /// 删除文件；未知的 public_id 直接忽略
    async fn delete(&self, public_ids: &[String]) -> Result<(), UploadError>;
}
