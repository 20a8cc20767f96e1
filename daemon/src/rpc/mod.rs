//! HTTP/WebSocket front door of the broker.

pub mod handlers;
pub mod hub;
pub mod message_cache;
pub mod middleware;
pub mod websocket;

use std::sync::Arc;

use actix_web::{
    dev::ServerHandle,
    get,
    web::{self, Data, Payload},
    App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use tokio::sync::Mutex;

use clearhouse_common::{rpc::RpcHandler, task::spawn_task};

use crate::{config::VERSION, core::{broker::Broker, error::BrokerError}};

pub struct RpcServer {
    handle: Mutex<Option<ServerHandle>>,
}

impl RpcServer {
    /// Register all methods and bind the HTTP server. The WebSocket
    /// endpoint lives at `/ws`.
    pub async fn start(broker: Arc<Broker>, bind_address: &str) -> Result<Arc<Self>, BrokerError> {
        let mut rpc_handler = RpcHandler::new();
        handlers::register_methods(&mut rpc_handler, &broker);
        let rpc_handler = Arc::new(rpc_handler);

        info!("Starting RPC server on {}", bind_address);
        if bind_address.starts_with("0.0.0.0") {
            warn!("RPC server is bound to all interfaces; front it with TLS in production");
        }

        let server = Arc::new(Self {
            handle: Mutex::new(None),
        });

        let app_broker = broker.clone();
        let app_handler = rpc_handler.clone();
        let http_server = HttpServer::new(move || {
            App::new()
                .app_data(Data::new(app_broker.clone()))
                .app_data(Data::new(app_handler.clone()))
                .route("/ws", web::get().to(ws_endpoint))
                .service(index)
        })
        .disable_signals()
        .bind(bind_address)
        .map_err(|e| BrokerError::Any(anyhow::anyhow!("cannot bind {}: {}", bind_address, e)))?
        .run();

        {
            let handle = http_server.handle();
            let mut lock = server.handle.lock().await;
            *lock = Some(handle);
        }
        spawn_task("rpc-server", http_server);

        Ok(server)
    }

    pub async fn stop(&self) {
        info!("Stopping RPC server...");
        let mut handle = self.handle.lock().await;
        if let Some(handle) = handle.take() {
            handle.stop(true).await;
            info!("RPC server stopped");
        } else {
            warn!("RPC server is not running");
        }
    }
}

async fn ws_endpoint(
    broker: Data<Arc<Broker>>,
    handler: Data<Arc<RpcHandler>>,
    request: HttpRequest,
    body: Payload,
) -> actix_web::Result<HttpResponse> {
    websocket::serve_connection(
        broker.get_ref().clone(),
        handler.get_ref().clone(),
        &request,
        body,
    )
    .await
}

#[get("/")]
async fn index() -> impl Responder {
    HttpResponse::Ok().body(format!("clearhouse {}", VERSION))
}
