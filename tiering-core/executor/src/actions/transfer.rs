//! 文件传输动作

use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use tiering_boundary::{UploadReceipt, UploadRequest};

use super::{
    action_handler, capture_keys, generate_content, settle, sha256_hex, target_file_id, ActionEnv,
    Settled, STATUS_CREATED, STATUS_NO_CONTENT, STATUS_OK,
};
use crate::context::{ContextValue, ExecutionContext};
use crate::report::StepResult;
use crate::suite::Step;
use crate::{ExecutorError, Result};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

action_handler!(CreateFile, create_file, "生成测试文件内容 (size, filename)");
action_handler!(Upload, upload, "上传当前文件 (content_type, skip_file, capture)");
action_handler!(UploadFile, upload_file, "生成并上传文件 (size, filename, content_type, capture)");
action_handler!(UploadMultiple, upload_multiple, "依次上传多个文件 (files[])");
action_handler!(BulkUpload, bulk_upload, "批量上传 count 个文件 (count, size)");
action_handler!(Download, download, "下载文件 (file_id)");
action_handler!(Delete, delete, "删除文件 (file_id, count)");

/// 内容类型参数：未声明时为默认类型，显式 null 表示不设置
fn content_type_param(step: &Step) -> Result<Option<String>> {
    if !step.has_param("content_type") {
        return Ok(Some(DEFAULT_CONTENT_TYPE.to_string()));
    }
    Ok(step.str_param("content_type")?.map(str::to_string))
}

/// 记录上传成功的结果
fn record_upload(
    step: &Step,
    ctx: &mut ExecutionContext,
    receipt: &UploadReceipt,
    checksum: Option<String>,
) -> Result<()> {
    ctx.set("last_file_id", receipt.file_id.as_str());
    ctx.set("last_upload_response", ContextValue::record(receipt)?);
    if let Some(checksum) = checksum {
        ctx.set("last_checksum", checksum);
    }
    capture_keys(step, ctx, &receipt.file_id)
}

async fn create_file(step: &Step, ctx: &mut ExecutionContext, env: &ActionEnv) -> Result<StepResult> {
    let size = env.payload_size(step, "size")?;
    let filename = step.str_param("filename")?.unwrap_or("test.bin").to_string();

    ctx.set("current_file_content", generate_content(size));
    ctx.set("current_filename", filename.as_str());
    ctx.set("current_file_size", size as i64);

    debug!("生成测试文件: {} ({} 字节)", filename, size);
    Ok(StepResult::passed(format!("生成文件 {} ({} 字节)", filename, size)))
}

async fn upload(step: &Step, ctx: &mut ExecutionContext, env: &ActionEnv) -> Result<StepResult> {
    let request = if step.bool_param("skip_file")? {
        UploadRequest::without_file()
    } else {
        let content = ctx.bytes("current_file_content")?.to_vec();
        let filename = match step.str_param("filename")? {
            Some(name) => name.to_string(),
            None => ctx.text("current_filename").unwrap_or("test.bin").to_string(),
        };
        UploadRequest {
            filename,
            content: Some(content),
            content_type: content_type_param(step)?,
        }
    };

    let checksum = request.content.as_deref().map(sha256_hex);
    let result = env.service.upload(request, env.call_timeout()).await;

    let receipt = match settle(step, ctx, result, STATUS_CREATED)? {
        Settled::Success(receipt) => receipt,
        Settled::ExpectedFailure(r) => return Ok(r),
    };

    record_upload(step, ctx, &receipt, checksum)?;
    info!("上传成功: {} ({} 字节, {})", receipt.file_id, receipt.size, receipt.tier);
    Ok(StepResult::passed(format!(
        "上传成功: {} ({} 字节, {})",
        receipt.file_id, receipt.size, receipt.tier
    )))
}

async fn upload_file(step: &Step, ctx: &mut ExecutionContext, env: &ActionEnv) -> Result<StepResult> {
    let size = env.payload_size(step, "size")?;
    let filename = match step.str_param("filename")? {
        Some(name) => name.to_string(),
        None => format!("test_{}.bin", &Uuid::new_v4().simple().to_string()[..8]),
    };
    let content = generate_content(size);
    let checksum = sha256_hex(&content);

    let request = UploadRequest {
        filename: filename.clone(),
        content: Some(content.clone()),
        content_type: content_type_param(step)?,
    };
    let result = env.service.upload(request, env.call_timeout()).await;

    let receipt = match settle(step, ctx, result, STATUS_CREATED)? {
        Settled::Success(receipt) => receipt,
        Settled::ExpectedFailure(r) => return Ok(r),
    };

    ctx.set("current_file_content", content);
    ctx.set("current_filename", filename.as_str());
    ctx.set("current_file_size", size as i64);
    ctx.set(format!("file_{}", filename), receipt.file_id.as_str());
    record_upload(step, ctx, &receipt, Some(checksum))?;

    debug!("上传文件 {} -> {}", filename, receipt.file_id);
    Ok(StepResult::passed(format!(
        "上传 {} 成功: {} ({})",
        filename, receipt.file_id, receipt.tier
    )))
}

async fn upload_multiple(step: &Step, ctx: &mut ExecutionContext, env: &ActionEnv) -> Result<StepResult> {
    let files = match step.param("files") {
        Some(Value::Array(files)) => files.clone(),
        _ => {
            return Err(ExecutorError::InvalidParameter(
                "upload_multiple 需要 files 列表".to_string(),
            ))
        }
    };

    let mut uploaded = Vec::with_capacity(files.len());
    let mut last_id = None;

    for entry in &files {
        let filename = entry
            .get("filename")
            .and_then(Value::as_str)
            .unwrap_or("test.bin")
            .to_string();
        let content_type = match entry.get("content_type") {
            None => Some(DEFAULT_CONTENT_TYPE.to_string()),
            Some(Value::Null) => None,
            Some(v) => Some(
                v.as_str()
                    .ok_or_else(|| {
                        ExecutorError::InvalidParameter(format!("无效的内容类型: {}", v))
                    })?
                    .to_string(),
            ),
        };
        let size = match entry.get("size") {
            Some(size) => env.test_data.resolve_size(size)?,
            None => env.test_data.resolve_size(&Value::from("sample"))?,
        };
        let size = env.check_payload(size)?;

        let request = UploadRequest {
            filename: filename.clone(),
            content: Some(generate_content(size)),
            content_type: content_type.clone(),
        };
        let result = env.service.upload(request, env.call_timeout()).await;

        match settle(step, ctx, result, STATUS_CREATED)? {
            Settled::Success(receipt) => {
                uploaded.push(ContextValue::Record(json!({
                    "filename": filename,
                    "file_id": receipt.file_id.clone(),
                    "content_type": content_type,
                })));
                last_id = Some(receipt.file_id);
            }
            Settled::ExpectedFailure(r) => debug!("{} 未上传: {}", filename, r.detail),
        }
    }

    let count = uploaded.len();
    ctx.set("uploaded_files", ContextValue::List(uploaded));
    if let Some(id) = last_id {
        ctx.set("last_file_id", id);
    }

    Ok(StepResult::passed(format!(
        "上传 {}/{} 个文件",
        count,
        files.len()
    )))
}

async fn bulk_upload(step: &Step, ctx: &mut ExecutionContext, env: &ActionEnv) -> Result<StepResult> {
    let count = env.count_param(step, 10)?;
    let size = env.payload_size(step, "size")?;
    let mut file_ids = Vec::new();

    for i in 0..count {
        let request = UploadRequest::new(
            &format!("bulk_file_{}.bin", i),
            generate_content(size),
            Some(DEFAULT_CONTENT_TYPE),
        );
        let result = env.service.upload(request, env.call_timeout()).await;

        match settle(step, ctx, result, STATUS_CREATED)? {
            Settled::Success(receipt) => file_ids.push(receipt.file_id),
            Settled::ExpectedFailure(r) => return Ok(r),
        }
    }

    info!("批量上传完成: {} 个文件", file_ids.len());
    let detail = format!("批量上传 {} 个文件 ({} 字节/个)", file_ids.len(), size);
    if let Some(last) = file_ids.last() {
        ctx.set("last_file_id", last.as_str());
    }
    ctx.set("bulk_file_ids", file_ids);
    Ok(StepResult::passed(detail))
}

async fn download(step: &Step, ctx: &mut ExecutionContext, env: &ActionEnv) -> Result<StepResult> {
    let file_id = target_file_id(step, ctx)?;
    let timeout = env.call_timeout();

    let result = env
        .call_with_retry("下载文件", || env.service.download(&file_id, timeout))
        .await;

    let content = match settle(step, ctx, result, STATUS_OK)? {
        Settled::Success(content) => content,
        Settled::ExpectedFailure(r) => return Ok(r),
    };

    let detail = format!("下载 {} ({} 字节)", file_id, content.len());
    ctx.set("last_download_content", content);
    Ok(StepResult::passed(detail))
}

async fn delete(step: &Step, ctx: &mut ExecutionContext, env: &ActionEnv) -> Result<StepResult> {
    let count = env.count_param(step, 1)?;

    let targets = if count > 1 {
        let ids = ctx.text_list("bulk_file_ids")?;
        if ids.len() < count {
            return Err(ExecutorError::InvalidParameter(format!(
                "需要删除 {} 个文件, bulk_file_ids 只有 {} 个",
                count,
                ids.len()
            )));
        }
        ids.into_iter().take(count).collect()
    } else {
        vec![target_file_id(step, ctx)?]
    };

    let mut deleted = Vec::with_capacity(targets.len());
    for file_id in &targets {
        let result = env.service.delete(file_id, env.call_timeout()).await;
        match settle(step, ctx, result, STATUS_NO_CONTENT)? {
            Settled::Success(()) => deleted.push(file_id.clone()),
            Settled::ExpectedFailure(r) if targets.len() == 1 => return Ok(r),
            Settled::ExpectedFailure(r) => debug!("{} 未删除: {}", file_id, r.detail),
        }
    }

    let detail = format!("删除 {}/{} 个文件", deleted.len(), targets.len());
    ctx.set("deleted_file_ids", deleted);
    Ok(StepResult::passed(detail))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_param() {
        assert_eq!(
            content_type_param(&Step::new("upload")).unwrap().as_deref(),
            Some(DEFAULT_CONTENT_TYPE)
        );
        assert_eq!(
            content_type_param(&Step::new("upload").with_param("content_type", Value::Null)).unwrap(),
            None
        );
        assert_eq!(
            content_type_param(&Step::new("upload").with_param("content_type", "text/plain"))
                .unwrap()
                .as_deref(),
            Some("text/plain")
        );
    }
}
