// Copyright (c) 2026 VeriDB Contributors
// SPDX-License-Identifier: Apache-2.0

//! Session keep-alive task: sleeps for one interval, sends `KeepAlive`, and
//! loops until cancelled. Transport errors are logged and swallowed.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tonic::metadata::AsciiMetadataValue;
use tonic::transport::Channel;
use tonic::Request;
use veridb_protocol::pb;
use veridb_protocol::pb::ledger_client::LedgerClient;
use veridb_protocol::SESSION_ID_HEADER;

pub(crate) struct Heartbeat {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub(crate) fn start(
    channel: Channel,
    session_header: AsciiMetadataValue,
    interval: Duration,
    ticks: watch::Sender<u64>,
) -> Heartbeat {
    let token = CancellationToken::new();
    let loop_token = token.clone();

    let handle = tokio::spawn(async move {
        let mut client = LedgerClient::new(channel);
        loop {
            tokio::select! {
                _ = loop_token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    let mut request = Request::new(pb::KeepAliveRequest {});
                    request
                        .metadata_mut()
                        .insert(SESSION_ID_HEADER, session_header.clone());
                    match client.keep_alive(request).await {
                        Ok(_) => tracing::debug!("keep-alive sent"),
                        Err(status) => {
                            tracing::warn!(error = %status, "keep-alive failed")
                        }
                    }
                    ticks.send_modify(|count| *count += 1);
                }
            }
        }
        tracing::debug!("heartbeat stopped");
    });

    Heartbeat { token, handle }
}

impl Heartbeat {
    /// Signals the task and joins it, aborting past the timeout.
    pub(crate) async fn stop(self, timeout: Duration) {
        self.token.cancel();
        let mut handle = self.handle;
        if tokio::time::timeout(timeout, &mut handle).await.is_err() {
            handle.abort();
        }
    }
}
