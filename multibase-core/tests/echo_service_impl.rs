use echo_service::greeter::{HelloReq, HelloResp};
use echo_service::pb::{EchoRequest, EchoResponse};
use echo_service::{EchoService, EchoServiceServer, Greeter, GreeterServer};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Notify, mpsc};
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tokio_stream::{Stream, StreamExt};
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};

#[derive(Default, Clone)]
pub struct EchoServiceImpl {
    /// Notified when an `EndlessEcho` stream notices its client went away.
    pub endless_finished: Arc<Notify>,
}

#[tonic::async_trait]
impl EchoService for EchoServiceImpl {
    type BidirectionalEchoStream = Pin<Box<dyn Stream<Item = Result<EchoResponse, Status>> + Send>>;
    type ServerStreamingEchoStream = ReceiverStream<Result<EchoResponse, Status>>;
    type EndlessEchoStream = ReceiverStream<Result<EchoResponse, Status>>;

    async fn unary_echo(
        &self,
        request: Request<EchoRequest>,
    ) -> Result<Response<EchoResponse>, Status> {
        Ok(Response::new(EchoResponse {
            message: request.into_inner().message,
        }))
    }

    async fn server_streaming_echo(
        &self,
        request: Request<EchoRequest>,
    ) -> Result<Response<Self::ServerStreamingEchoStream>, Status> {
        let msg = request.into_inner().message;
        let (tx, rx) = mpsc::channel(4);

        tokio::spawn(async move {
            for i in 0..3 {
                let response = EchoResponse {
                    message: format!("{} - seq {}", msg, i),
                };
                tx.send(Ok(response)).await.ok();
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn client_streaming_echo(
        &self,
        request: Request<Streaming<EchoRequest>>,
    ) -> Result<Response<EchoResponse>, Status> {
        let mut stream = request.into_inner();
        let mut full_msg = String::new();

        while let Some(req) = stream.next().await {
            let req = req?;
            full_msg.push_str(&req.message);
        }

        Ok(Response::new(EchoResponse { message: full_msg }))
    }

    async fn bidirectional_echo(
        &self,
        request: Request<Streaming<EchoRequest>>,
    ) -> Result<Response<Self::BidirectionalEchoStream>, Status> {
        let mut in_stream = request.into_inner();
        let (tx, rx) = mpsc::channel(128);

        tokio::spawn(async move {
            while let Some(result) = in_stream.next().await {
                match result {
                    Ok(req) => {
                        let resp = EchoResponse {
                            message: format!("echo: {}", req.message),
                        };
                        if tx.send(Ok(resp)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn endless_echo(
        &self,
        request: Request<EchoRequest>,
    ) -> Result<Response<Self::EndlessEchoStream>, Status> {
        let msg = request.into_inner().message;
        let finished = Arc::clone(&self.endless_finished);
        let (tx, rx) = mpsc::channel(1);

        tokio::spawn(async move {
            for i in 0.. {
                let response = EchoResponse {
                    message: format!("{msg} - tick {i}"),
                };
                if tx.send(Ok(response)).await.is_err() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            finished.notify_one();
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn failing_echo(
        &self,
        _request: Request<EchoRequest>,
    ) -> Result<Response<EchoResponse>, Status> {
        Err(Status::failed_precondition("echo is disabled"))
    }
}

pub struct GreeterImpl;

#[tonic::async_trait]
impl Greeter for GreeterImpl {
    async fn hello(&self, request: Request<HelloReq>) -> Result<Response<HelloResp>, Status> {
        Ok(Response::new(HelloResp {
            message: format!("Hello, {}!", request.into_inner().name),
        }))
    }
}

/// Serves both services on a random local port and returns `host:port`.
pub async fn serve(echo: EchoServiceImpl) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    tokio::spawn(
        Server::builder()
            .add_service(EchoServiceServer::new(echo))
            .add_service(GreeterServer::new(GreeterImpl))
            .serve_with_incoming(TcpListenerStream::new(listener)),
    );

    address
}

/// An address nothing listens on.
pub async fn closed_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}
