//! Data-plane service
//!
//! Every path and method is handed to the [`Dispatcher`]; the router only
//! adds the shared middleware stack.
//!
//! ```rust,ignore
//! let service = GatewayService::new(dispatcher);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await?;
//! axum::serve(
//!     listener,
//!     service.into_router().into_make_service_with_connect_info::<SocketAddr>(),
//! )
//! .await?;
//! ```

use crate::gateway::dispatcher::Dispatcher;
use crate::gateway::middleware_stack::MiddlewareStack;
use axum::{
    extract::{Request, State},
    response::Response,
    Router,
};
use std::sync::Arc;

pub struct GatewayService {
    dispatcher: Arc<Dispatcher>,
}

impl GatewayService {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Create an Axum router for the data plane with middleware
    pub fn into_router(self) -> Router {
        let router = Router::new()
            .fallback(dispatch_handler)
            .with_state(self.dispatcher);
        MiddlewareStack::data_plane().apply_to_router(router)
    }
}

async fn dispatch_handler(State(dispatcher): State<Arc<Dispatcher>>, request: Request) -> Response {
    dispatcher.dispatch(request).await
}
