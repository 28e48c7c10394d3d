use em_core::time::days;
use tracing::info;

use super::*;

impl ObjectStorageEngine {
    pub(super) fn initiate_multipart_upload(
        &mut self,
        bucket: &str,
        key: &str,
    ) -> anyhow::Result<Completed<StorageResponse>> {
        self.bucket(bucket)?;
        let upload_id = hex_id(&mut self.rng);
        let upload = MultipartUpload {
            upload_id: upload_id.clone(),
            bucket: bucket.into(),
            key: key.into(),
            initiated_at: self.now,
            parts: BTreeMap::new(),
        };
        self.uploads.insert(upload_id.clone(), upload);
        Ok(Completed::new(12.0, StorageResponse::UploadInitiated { upload_id }))
    }

    pub(super) fn upload_part(
        &mut self,
        upload_id: &str,
        part_number: u32,
        size_bytes: u64,
    ) -> anyhow::Result<Completed<StorageResponse>> {
        let upload = self.uploads.get_mut(upload_id).ok_or_else(|| StorageError::upload_not_found(upload_id))?;
        upload.parts.insert(part_number, size_bytes);
        Ok(Completed::new(
            put_latency_ms(size_bytes),
            StorageResponse::PartUploaded { upload_id: upload_id.into(), part_number, size_bytes },
        ))
    }

    /// Assemble the listed parts into one STANDARD object.  Nothing changes unless the part list
    /// is strictly ascending and every listed part is present.
    pub(super) fn complete_multipart_upload(
        &mut self,
        upload_id: &str,
        parts: &[u32],
    ) -> anyhow::Result<Completed<StorageResponse>> {
        let upload = self.uploads.get(upload_id).ok_or_else(|| StorageError::upload_not_found(upload_id))?;
        if let Some(pair) = parts.windows(2).find(|pair| pair[1] <= pair[0]) {
            return Err(StorageError::invalid_part_order(&pair[1]));
        }

        let mut total: u64 = 0;
        for part in parts {
            let size = upload.parts.get(part).ok_or_else(|| StorageError::missing_part(part))?;
            total = total.checked_add(*size).ok_or_else(|| StorageError::entity_too_large(upload_id))?;
        }
        let (bucket, key) = (upload.bucket.clone(), upload.key.clone());

        let obj = self.write_object(&bucket, &key, total)?;
        self.uploads.remove(upload_id);
        Ok(Completed::new(put_latency_ms(total) + MULTIPART_ASSEMBLY_MS, StorageResponse::Object(obj)))
    }

    pub(super) fn abort_multipart_upload(&mut self, upload_id: &str) -> anyhow::Result<Completed<StorageResponse>> {
        self.uploads.remove(upload_id).ok_or_else(|| StorageError::upload_not_found(upload_id))?;
        self.aborted_uploads += 1;
        Ok(Completed::new(10.0, StorageResponse::UploadAborted { upload_id: upload_id.into() }))
    }

    /// Drop uploads that were never completed within the configured window.
    pub(super) fn abort_stale_uploads(&mut self) {
        let cutoff = self.now - days(i64::from(self.config.abort_incomplete_uploads_after_days));
        let before = self.uploads.len();
        self.uploads.retain(|_, u| u.initiated_at >= cutoff);

        let aborted = before - self.uploads.len();
        if aborted > 0 {
            info!(aborted, "aborted incomplete multipart uploads");
            self.aborted_uploads += aborted as u64;
        }
    }
}
