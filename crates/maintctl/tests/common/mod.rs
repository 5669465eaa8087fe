//! In-process cmsd on a temporary socket.
#![allow(dead_code)]

use cmsd::{create_shared_state, rpc_server, CmsdConfig};
use maintctl::SocketCmsClient;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::oneshot;

pub struct Cms {
    pub socket: PathBuf,
    _dir: tempfile::TempDir,
    _stop: oneshot::Sender<()>,
}

impl Cms {
    pub async fn start() -> Self {
        Self::start_with(CmsdConfig::default()).await
    }

    pub async fn start_with(config: CmsdConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("cms.sock");
        let listener = rpc_server::bind(&socket).await.unwrap();
        let state = create_shared_state(config);
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = rpc_server::serve(listener, state, async {
                let _ = rx.await;
            })
            .await;
        });
        Self {
            socket,
            _dir: dir,
            _stop: tx,
        }
    }

    pub fn client(&self, user: &str) -> SocketCmsClient {
        SocketCmsClient::new(&self.socket)
            .with_user(Some(user.to_string()))
            .with_timeout(Duration::from_secs(2))
            .with_max_retries(1)
    }
}

pub fn hosts(raw: &str) -> Vec<String> {
    maintctl::resolver::parse_host_list(raw)
}
