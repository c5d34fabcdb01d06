//! HTTP implementation of [`Indexer`].
//!
//! Three services sit behind it: the wallet status service (form posts keyed
//! by xpub or address), the relay (JSON, optional `api_key` header) which
//! also lists an xpub's txids, and the Planaria query service which resolves
//! those txids to full transactions.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Client, Response};
use serde_json::{Value, json};
use tracing::debug;

use satchel_core::error::IndexerError;
use satchel_core::feed::{encode_query, transactions_query};
use satchel_core::traits::Indexer;
use satchel_core::types::{HistoryEntry, IndexerStatus, SubmitResponse};

use crate::config::RpcConfig;

fn transport(e: reqwest::Error) -> IndexerError {
    IndexerError::Transport(e.to_string())
}

/// Extended public keys are tracked per account; anything else is an address.
pub fn is_extended_identity(identity: &str) -> bool {
    identity.starts_with("xpub") || identity.starts_with("tpub")
}

/// Read a JSON body, treating any non-success status as a transport failure.
async fn read_json(response: Response) -> Result<Value, IndexerError> {
    let status = response.status();
    let url = response.url().path().to_string();
    let text = response.text().await.map_err(transport)?;
    if !status.is_success() {
        return Err(IndexerError::Transport(format!("{url} answered {status}: {text}")));
    }
    serde_json::from_str(&text).map_err(|e| IndexerError::Decode(format!("{url}: {e}")))
}

#[derive(Clone, Debug)]
pub struct RemoteIndexer {
    http: Client,
    config: RpcConfig,
}

impl RemoteIndexer {
    pub fn new(config: RpcConfig) -> Result<Self, IndexerError> {
        let http = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| IndexerError::Configuration(e.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &RpcConfig {
        &self.config
    }

    fn relay_url(&self, path: &str) -> String {
        format!(
            "{}/api/v3/{}/{path}",
            self.config.rpc_url.trim_end_matches('/'),
            self.config.chain
        )
    }

    fn planaria_key(&self) -> Result<&str, IndexerError> {
        self.config
            .planaria_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| IndexerError::Configuration("planaria key not set".into()))
    }

    /// Run a query against the Planaria service.
    pub async fn query_planaria(&self, query: &Value) -> Result<Value, IndexerError> {
        let key = self.planaria_key()?;
        let url = format!("{}{}", self.config.planaria_url, encode_query(query));
        let response = self.http.get(url).header("key", key).send().await.map_err(transport)?;
        read_json(response).await
    }

    /// Txids touching an xpub, as listed by the relay.
    pub async fn xpub_txids(&self, xpub: &str) -> Result<Vec<String>, IndexerError> {
        let mut request = self.http.get(self.relay_url(&format!("xpub/{xpub}/txs"))).header(ACCEPT, "application/json");
        if let Some(key) = &self.config.api_key {
            request = request.header("api_key", key);
        }
        let body = read_json(request.send().await.map_err(transport)?).await?;
        let records = body
            .as_array()
            .ok_or_else(|| IndexerError::Decode("transaction list is not an array".into()))?;
        Ok(records
            .iter()
            .filter_map(|r| r.get("txid").and_then(Value::as_str))
            .map(str::to_owned)
            .collect())
    }
}

/// Planaria answers `{ "u": [...], "c": [...] }`: unconfirmed and confirmed.
fn collect_entries(page: &Value, into: &mut HashMap<String, HistoryEntry>) -> usize {
    let mut found = 0;
    for (field, confirmed) in [("u", false), ("c", true)] {
        let Some(txs) = page.get(field).and_then(Value::as_array) else {
            continue;
        };
        for tx in txs {
            let Some(txid) = tx.pointer("/tx/h").and_then(Value::as_str) else {
                continue;
            };
            found += 1;
            into.insert(
                txid.to_string(),
                HistoryEntry { txid: txid.to_string(), confirmed, detail: tx.clone() },
            );
        }
    }
    found
}

#[async_trait]
impl Indexer for RemoteIndexer {
    async fn status(&self, identity: &str) -> Result<IndexerStatus, IndexerError> {
        let (path, field) = if is_extended_identity(identity) {
            ("xpub/status", "xpub")
        } else {
            ("address/status", "address")
        };
        let url = format!("{}/{path}", self.config.status_url.trim_end_matches('/'));
        let response = self
            .http
            .post(url)
            .header(ACCEPT, "application/json")
            .form(&[(field, identity)])
            .send()
            .await
            .map_err(transport)?;
        let body = read_json(response).await?;
        serde_json::from_value(body).map_err(|e| IndexerError::Decode(format!("status: {e}")))
    }

    async fn submit(&self, raw_tx_hex: &str) -> Result<SubmitResponse, IndexerError> {
        let mut request = self
            .http
            .post(self.relay_url("tx/send"))
            .header(ACCEPT, "application/json")
            .json(&json!({ "rawtx": raw_tx_hex }));
        if let Some(key) = &self.config.api_key {
            request = request.header("api_key", key);
        }
        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        let text = response.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(IndexerError::Rejected { status: status.as_u16(), body: text });
        }
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        let txid = body.get("txid").and_then(Value::as_str).map(str::to_owned);
        Ok(SubmitResponse { txid, body })
    }

    async fn history(&self, identity: &str) -> Result<Vec<HistoryEntry>, IndexerError> {
        if !is_extended_identity(identity) {
            debug!("history is only indexed per xpub");
            return Ok(Vec::new());
        }
        self.planaria_key()?;
        let txids = self.xpub_txids(identity).await?;
        if txids.is_empty() {
            return Ok(Vec::new());
        }

        let limit = self.config.history_page_size.max(1);
        let mut found = HashMap::new();
        for page in 1.. {
            let body = self.query_planaria(&transactions_query(&txids, limit, page)).await?;
            let n = collect_entries(&body, &mut found);
            if n < limit || page * limit >= txids.len() {
                break;
            }
        }
        debug!(listed = txids.len(), resolved = found.len(), "history fetched");
        // Relay order, newest first.
        Ok(txids.iter().filter_map(|txid| found.remove(txid)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Form, Path};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};

    const XPUB: &str = "xpub661MyMwAqRbcFtXgS5sYJABqqG9YLmC4Q1Rdap9gSE8NqtwybGhePY2gZ29ESFjqJoCu1Rupje8YtGqsefD265TMg7usUDFdp6W1EGMcet8";
    const TXID_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const TXID_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn mock_router() -> Router {
        Router::new()
            .route(
                "/xpub/status",
                post(|Form(form): Form<HashMap<String, String>>| async move {
                    if form.get("xpub").map(String::as_str) != Some(XPUB) {
                        return Err(StatusCode::BAD_REQUEST);
                    }
                    Ok(Json(json!({
                        "confirmed": "1500",
                        "unconfirmed": 200,
                        "nextIndex": 3,
                        "utxos": [{
                            "txid": TXID_A, "outputIndex": 1, "value": 1500, "chain": 0, "num": 2
                        }]
                    })))
                }),
            )
            .route(
                "/address/status",
                post(|Form(form): Form<HashMap<String, String>>| async move {
                    Json(json!({ "confirmed": 7, "utxos": [], "echo": form.get("address") }))
                }),
            )
            .route(
                "/api/v3/main/tx/send",
                post(|Json(body): Json<Value>| async move {
                    match body["rawtx"].as_str() {
                        Some("00") => Err((StatusCode::BAD_REQUEST, "bad-txns-inputs-missingorspent")),
                        Some(_) => Ok(Json(json!({ "txid": TXID_B }))),
                        None => Err((StatusCode::UNPROCESSABLE_ENTITY, "missing rawtx")),
                    }
                }),
            )
            .route(
                "/api/v3/main/xpub/:xpub/txs",
                get(|Path(xpub): Path<String>, headers: HeaderMap| async move {
                    assert_eq!(xpub, XPUB);
                    assert_eq!(headers.get("api_key").and_then(|v| v.to_str().ok()), Some("relay-key"));
                    Json(json!([{ "txid": TXID_B }, { "txid": TXID_A }]))
                }),
            )
            .route(
                "/q/*query",
                get(|headers: HeaderMap| async move {
                    if headers.get("key").is_none() {
                        return Err(StatusCode::UNAUTHORIZED);
                    }
                    Ok(Json(json!({
                        "u": [{ "tx": { "h": TXID_B } }],
                        "c": [{ "tx": { "h": TXID_A }, "blk": { "i": 600000 } }]
                    })))
                }),
            )
    }

    async fn indexer() -> RemoteIndexer {
        let base = serve(mock_router()).await;
        RemoteIndexer::new(RpcConfig {
            api_key: Some("relay-key".into()),
            planaria_key: Some("planaria-key".into()),
            ..RpcConfig::local(&base)
        })
        .unwrap()
    }

    #[test]
    fn identity_kind() {
        assert!(is_extended_identity(XPUB));
        assert!(is_extended_identity("tpubD6NzVbkrYhZ4"));
        assert!(!is_extended_identity("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"));
    }

    #[tokio::test]
    async fn status_posts_xpub_form() {
        let status = indexer().await.status(XPUB).await.unwrap();
        assert_eq!(status.confirmed, 1500);
        assert_eq!(status.unconfirmed, 200);
        assert_eq!(status.next_index, Some(3));
        assert_eq!(status.utxos[0].vout, 1);
        assert_eq!(status.utxos[0].num, Some(2));
    }

    #[tokio::test]
    async fn status_by_address() {
        let status = indexer().await.status("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa").await.unwrap();
        assert_eq!(status.confirmed, 7);
        assert!(status.utxos.is_empty());
    }

    #[tokio::test]
    async fn submit_returns_txid() {
        let resp = indexer().await.submit("0100").await.unwrap();
        assert_eq!(resp.txid.as_deref(), Some(TXID_B));
    }

    #[tokio::test]
    async fn submit_rejection_keeps_status_and_body() {
        let err = indexer().await.submit("00").await.unwrap_err();
        assert_eq!(
            err,
            IndexerError::Rejected { status: 400, body: "bad-txns-inputs-missingorspent".into() }
        );
    }

    #[tokio::test]
    async fn history_resolves_in_relay_order() {
        let history = indexer().await.history(XPUB).await.unwrap();
        let txids: Vec<&str> = history.iter().map(|h| h.txid.as_str()).collect();
        assert_eq!(txids, vec![TXID_B, TXID_A]);
        assert!(!history[0].confirmed);
        assert!(history[1].confirmed);
        assert_eq!(history[1].detail["blk"]["i"], 600000);
    }

    #[tokio::test]
    async fn history_without_planaria_key_is_configuration_error() {
        let base = serve(mock_router()).await;
        let idx = RemoteIndexer::new(RpcConfig::local(&base)).unwrap();
        assert!(matches!(idx.history(XPUB).await.unwrap_err(), IndexerError::Configuration(_)));
    }

    #[tokio::test]
    async fn history_for_address_is_empty() {
        let history = indexer().await.history("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa").await.unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn unreachable_service_is_transport_error() {
        let idx = RemoteIndexer::new(RpcConfig::local("http://127.0.0.1:1")).unwrap();
        assert!(matches!(idx.status(XPUB).await.unwrap_err(), IndexerError::Transport(_)));
    }

    #[test]
    fn collect_skips_entries_without_hash() {
        let mut found = HashMap::new();
        let n = collect_entries(&json!({ "c": [{ "tx": {} }, { "tx": { "h": "ab" } }] }), &mut found);
        assert_eq!(n, 1);
        assert!(found["ab"].confirmed);
    }
}
