//! # File Service
//!
//! **INTERNAL USE ONLY**: a small gRPC service used to exercise the `noodle` CLI, both from
//! integration tests and through the `noodle-testserver` binary.
//! It lists and describes the entries of a single directory.
use std::path::{Component, Path, PathBuf};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

pub mod pb {
    include!(concat!(env!("OUT_DIR"), "/files.rs"));
}

pub use pb::file_service_server::{FileService, FileServiceServer};
pub use pb::stat_service_server::{StatService, StatServiceServer};
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("descriptors");

use pb::{FileEntry, ListFilesRequest, ListFilesResponse, StatRequest};

/// Serves the entries of `root`, the working directory by default.
#[derive(Debug, Clone)]
pub struct FileServer {
    root: PathBuf,
}

impl Default for FileServer {
    fn default() -> Self {
        Self::new(".")
    }
}

impl FileServer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn entries(&self) -> Result<Vec<FileEntry>, Status> {
        let mut dir = tokio::fs::read_dir(&self.root).await.map_err(io_status)?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await.map_err(io_status)? {
            let metadata = entry.metadata().await.map_err(io_status)?;
            entries.push(FileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: metadata.is_dir(),
                size: metadata.len(),
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

fn io_status(err: std::io::Error) -> Status {
    match err.kind() {
        std::io::ErrorKind::NotFound => Status::not_found(err.to_string()),
        _ => Status::internal(err.to_string()),
    }
}

#[tonic::async_trait]
impl FileService for FileServer {
    type StreamFilesStream = ReceiverStream<Result<FileEntry, Status>>;

    async fn list_files(
        &self,
        _request: Request<ListFilesRequest>,
    ) -> Result<Response<ListFilesResponse>, Status> {
        let files = self.entries().await?.into_iter().map(|e| e.name).collect();
        Ok(Response::new(ListFilesResponse { files }))
    }

    async fn stream_files(
        &self,
        _request: Request<ListFilesRequest>,
    ) -> Result<Response<Self::StreamFilesStream>, Status> {
        let entries = self.entries().await?;
        let (tx, rx) = tokio::sync::mpsc::channel(entries.len().max(1));

        tokio::spawn(async move {
            for entry in entries {
                if tx.send(Ok(entry)).await.is_err() {
                    break;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

#[tonic::async_trait]
impl StatService for FileServer {
    async fn stat(&self, request: Request<StatRequest>) -> Result<Response<FileEntry>, Status> {
        let path = Path::new(&request.get_ref().path);

        if path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(Status::invalid_argument(
                "path must be relative to the served directory",
            ));
        }

        let metadata = tokio::fs::metadata(self.root.join(path))
            .await
            .map_err(io_status)?;

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Response::new(FileEntry {
            name,
            is_dir: metadata.is_dir(),
            size: metadata.len(),
        }))
    }
}
