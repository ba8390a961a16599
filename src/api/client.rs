use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use super::headers::IdentityHeaders;
use super::pipeline::InterceptorPipeline;
use super::transport::{ApiRequest, Method, Transport};
use crate::config::SessionConfig;
use crate::error::{AppError, AppResult};
use crate::identity::UserProfile;
use crate::session::{LogoutApi, ProfileSource};

/// Typed calls against the backend API, all routed through the pipeline.
pub struct ApiClient {
    pipeline: Arc<InterceptorPipeline>,
    config: Arc<SessionConfig>,
}

impl ApiClient {
    pub fn new(pipeline: Arc<InterceptorPipeline>, config: Arc<SessionConfig>) -> Self {
        Self { pipeline, config }
    }

    pub fn pipeline(&self) -> &Arc<InterceptorPipeline> { &self.pipeline }

    pub async fn profile(&self) -> AppResult<UserProfile> {
        self.pipeline.execute_json(ApiRequest::get(&self.config.profile_path)).await
    }

    pub async fn call(&self, req: ApiRequest) -> AppResult<Value> {
        self.pipeline.execute(req).await
    }
}

impl ProfileSource for ApiClient {
    fn fetch_profile(&self) -> BoxFuture<'_, AppResult<UserProfile>> {
        Box::pin(self.profile())
    }
}

/// Server-side session invalidation. Decorated like any other call but never
/// classified, so a 401 here cannot re-enter the logout protocol.
pub struct RemoteLogout {
    transport: Arc<dyn Transport>,
    identity: IdentityHeaders,
    config: Arc<SessionConfig>,
}

impl RemoteLogout {
    pub fn new(transport: Arc<dyn Transport>, identity: IdentityHeaders, config: Arc<SessionConfig>) -> Self {
        Self { transport, identity, config }
    }

    async fn invalidate_session(&self) -> AppResult<()> {
        let mut req = ApiRequest::new(Method::Post, &self.config.logout_path);
        self.identity.decorate(&mut req.headers);
        let resp = self.transport.send(req).await?;
        debug!(target: "logout", status = resp.status, "server logout answered");
        if (200..300).contains(&resp.status) {
            Ok(())
        } else {
            let msg = resp.message().unwrap_or("logout rejected").to_string();
            Err(AppError::response(resp.status, msg, resp.body))
        }
    }
}

impl LogoutApi for RemoteLogout {
    fn invalidate(&self) -> BoxFuture<'_, AppResult<()>> {
        Box::pin(self.invalidate_session())
    }
}
