//! Cloudinary 对象存储适配器

use application::{ObjectStore, UploadError, UploadFile};
use async_trait::async_trait;
use config::StorageConfig;
use data_encoding::HEXLOWER;
use domain::Attachment;
use futures_util::future::join_all;
use reqwest::multipart::{Form, Part};
use ring::digest::{digest, SHA1_FOR_LEGACY_USE_ONLY};
use serde::Deserialize;
use uuid::Uuid;

const DEFAULT_API_BASE: &str = "https://api.cloudinary.com/v1_1";

#[derive(Clone)]
pub struct CloudinaryObjectStore {
    client: reqwest::Client,
    api_base: String,
    cloud_name: String,
    api_key: String,
    api_secret: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    public_id: String,
    secure_url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl CloudinaryObjectStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self::with_api_base(config, DEFAULT_API_BASE)
    }

    /// 指定 API 地址（测试中指向本地 mock 服务）
    pub fn with_api_base(config: &StorageConfig, api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            cloud_name: config.cloud_name.clone(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
        }
    }

    /// 请求签名：参数按名称排序后以 `&` 连接，拼接密钥做 SHA-1
    fn sign(&self, params: &[(&str, &str)]) -> String {
        let mut params = params.to_vec();
        params.sort_by(|a, b| a.0.cmp(b.0));
        let payload = params
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&");
        let hashed = digest(
            &SHA1_FOR_LEGACY_USE_ONLY,
            format!("{payload}{}", self.api_secret).as_bytes(),
        );
        HEXLOWER.encode(hashed.as_ref())
    }

    fn endpoint(&self, action: &str) -> String {
        format!("{}/{}/{action}", self.api_base, self.cloud_name)
    }

    async fn destroy(&self, public_id: &str, timestamp: &str) -> Result<(), UploadError> {
        let signature = self.sign(&[("public_id", public_id), ("timestamp", timestamp)]);
        let response = self
            .client
            .post(self.endpoint("image/destroy"))
            .form(&[
                ("public_id", public_id),
                ("timestamp", timestamp),
                ("api_key", self.api_key.as_str()),
                ("signature", signature.as_str()),
            ])
            .send()
            .await
            .map_err(|err| UploadError::Unavailable(err.to_string()))?;

        if !response.status().is_success() {
            return Err(UploadError::Unavailable(format!(
                "destroy {public_id} failed with status {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for CloudinaryObjectStore {
    async fn upload(&self, file: UploadFile) -> Result<Attachment, UploadError> {
        let public_id = Uuid::new_v4().to_string();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = self.sign(&[("public_id", &public_id), ("timestamp", &timestamp)]);
        let file_name = file.file_name.clone();

        let part = Part::bytes(file.bytes)
            .file_name(file.file_name)
            .mime_str(&file.content_type)
            .map_err(|err| UploadError::Rejected {
                file_name: file_name.clone(),
                reason: err.to_string(),
            })?;

        let form = Form::new()
            .part("file", part)
            .text("api_key", self.api_key.clone())
            .text("timestamp", timestamp)
            .text("public_id", public_id)
            .text("signature", signature);

        let response = self
            .client
            .post(self.endpoint("auto/upload"))
            .multipart(form)
            .send()
            .await
            .map_err(|err| UploadError::Unavailable(err.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(UploadError::Unavailable(format!(
                "upload failed with status {status}"
            )));
        }
        if !status.is_success() {
            let reason = response
                .json::<ErrorResponse>()
                .await
                .map(|body| body.error.message)
                .unwrap_or_else(|_| status.to_string());
            return Err(UploadError::Rejected { file_name, reason });
        }

        let body = response
            .json::<UploadResponse>()
            .await
            .map_err(|err| UploadError::Unavailable(err.to_string()))?;

        tracing::debug!(public_id = %body.public_id, file_name = %file_name, "文件上传完成");
        Ok(Attachment::new(body.public_id, body.secure_url))
    }

    async fn delete(&self, public_ids: &[String]) -> Result<(), UploadError> {
        if public_ids.is_empty() {
            return Ok(());
        }
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let results = join_all(
            public_ids
                .iter()
                .map(|public_id| self.destroy(public_id, &timestamp)),
        )
        .await;

        // 逐个删除，只返回第一个失败
        let mut first_error = None;
        for (public_id, result) in public_ids.iter().zip(results) {
            if let Err(err) = result {
                tracing::warn!(public_id = %public_id, error = %err, "删除对象存储文件失败");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> StorageConfig {
        StorageConfig {
            cloud_name: "demo".into(),
            api_key: "key".into(),
            api_secret: "abcd".into(),
        }
    }

    #[test]
    fn signature_sorts_parameters() {
        let store = CloudinaryObjectStore::new(&credentials());
        let signature = store.sign(&[("timestamp", "1700000000"), ("public_id", "avatar-1")]);
        assert_eq!(signature, "576649503246f56a961b3b154bfbe11653e364a3");
    }

    #[tokio::test]
    async fn upload_returns_attachment_reference() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/demo/auto/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "public_id": "abc",
                "secure_url": "https://res.cloudinary.com/demo/abc.png"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = CloudinaryObjectStore::with_api_base(&credentials(), server.uri());
        let attachment = store
            .upload(UploadFile::new("a.png", "image/png", vec![1, 2, 3]))
            .await
            .unwrap();

        assert_eq!(attachment.public_id, "abc");
        assert_eq!(attachment.url, "https://res.cloudinary.com/demo/abc.png");
    }

    #[tokio::test]
    async fn rejected_upload_carries_reason() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/demo/auto/upload"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": { "message": "Invalid image file" }
            })))
            .mount(&server)
            .await;

        let store = CloudinaryObjectStore::with_api_base(&credentials(), server.uri());
        let err = store
            .upload(UploadFile::new("a.txt", "text/plain", b"hello".to_vec()))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            UploadError::Rejected {
                file_name: "a.txt".into(),
                reason: "Invalid image file".into(),
            }
        );
    }

    #[tokio::test]
    async fn delete_destroys_each_public_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/demo/image/destroy"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": "ok"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let store = CloudinaryObjectStore::with_api_base(&credentials(), server.uri());
        store
            .delete(&["one".to_string(), "two".to_string()])
            .await
            .unwrap();
    }
}
