//! RPC Module
//!
//! gRPC surface for build agents: the client-streaming `CreateLogStream` call
//! of `ferry.v1.Builds`.

use ferry_proto::v1::builds_server::{Builds, BuildsServer};
use ferry_proto::v1::{LogLineSubmission, LogStreamSummary};
use tonic::{Request, Response, Status, Streaming};

use crate::service::LogIngestor;

/// `ferry.v1.Builds` implementation backed by a [`LogIngestor`]
#[derive(Clone)]
pub struct BuildsService {
    ingestor: LogIngestor,
}

impl BuildsService {
    pub fn new(ingestor: LogIngestor) -> Self {
        Self { ingestor }
    }
}

#[tonic::async_trait]
impl Builds for BuildsService {
    async fn create_log_stream(
        &self,
        request: Request<Streaming<LogLineSubmission>>,
    ) -> Result<Response<LogStreamSummary>, Status> {
        tracing::info!(remote_addr = ?request.remote_addr(), "Log stream opened");

        let lines_inserted = self.ingestor.ingest(request.into_inner()).await?;

        Ok(Response::new(LogStreamSummary { lines_inserted }))
    }
}

/// Wrap an ingestor in the generated tonic server
pub fn builds_server(ingestor: LogIngestor) -> BuildsServer<BuildsService> {
    BuildsServer::new(BuildsService::new(ingestor))
}
