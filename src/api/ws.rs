// =============================================================================
// WebSocket Handler — live alert stream
// =============================================================================
//
// Clients connect to `/api/v1/alerts/stream` and receive one JSON frame per
// alert as it is published. Optional query parameters narrow the feed:
//
//   ?symbol=NIFTY50            only this symbol
//   ?type=BOS_ENTRY            only this alert kind
//   ?min_priority=High         at or above this priority
//
// A subscriber that falls behind its bounded queue receives a
// `{"type":"DROPPED","count":n}` frame where the gap occurred. The
// subscription ends (and unsubscribes) when the socket closes.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::alerts::{AlertFilter, BusEvent};
use crate::app_state::AppState;
use crate::types::{AlertKind, AlertPriority};

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    min_priority: Option<String>,
}

fn parse_filter(query: &StreamQuery) -> Result<AlertFilter, String> {
    let kinds = match &query.kind {
        Some(token) => {
            let kind: AlertKind = serde_json::from_value(serde_json::Value::String(token.clone()))
                .map_err(|_| format!("unknown alert type '{token}'"))?;
            Some(vec![kind])
        }
        None => None,
    };

    let min_priority = match &query.min_priority {
        Some(token) => Some(match token.to_ascii_lowercase().as_str() {
            "low" => AlertPriority::Low,
            "medium" => AlertPriority::Medium,
            "high" => AlertPriority::High,
            _ => return Err(format!("unknown priority '{token}'")),
        }),
        None => None,
    };

    Ok(AlertFilter {
        symbols: query.symbol.as_ref().map(|s| vec![s.to_uppercase()]),
        kinds,
        min_priority,
    })
}

/// Axum handler for the WebSocket upgrade request.
pub async fn alert_stream(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
) -> impl IntoResponse {
    let filter = match parse_filter(&query) {
        Ok(filter) => filter,
        Err(message) => {
            warn!(message, "alert stream rejected: bad filter");
            return (axum::http::StatusCode::BAD_REQUEST, message).into_response();
        }
    };

    info!(?query, "alert stream subscriber connecting");
    ws.on_upgrade(move |socket| handle_connection(socket, state, filter))
        .into_response()
}

/// Pump bus events to the socket until either side closes.
async fn handle_connection(socket: WebSocket, state: Arc<AppState>, filter: AlertFilter) {
    use futures_util::{SinkExt, StreamExt};

    let mut stream = state.bus.subscribe(filter);
    state.increment_version();

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = stream.recv() => {
                let frame = match &event {
                    BusEvent::Alert(alert) => serde_json::to_string(alert),
                    BusEvent::Dropped { count } => {
                        serde_json::to_string(&serde_json::json!({
                            "type": "DROPPED",
                            "count": count,
                        }))
                    }
                };
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "failed to serialise alert frame");
                        continue;
                    }
                };
                if let Err(e) = sender.send(Message::Text(frame)).await {
                    debug!(error = %e, "alert stream send failed, disconnecting");
                    break;
                }
            }

            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("alert stream subscriber disconnected");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Text / binary / pong from the client: ignored.
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "alert stream receive error");
                        break;
                    }
                }
            }
        }
    }

    // Dropping the stream unsubscribes from the bus.
    drop(stream);
    state.increment_version();
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn query(
        symbol: Option<&str>,
        kind: Option<&str>,
        min_priority: Option<&str>,
    ) -> StreamQuery {
        StreamQuery {
            symbol: symbol.map(String::from),
            kind: kind.map(String::from),
            min_priority: min_priority.map(String::from),
        }
    }

    #[test]
    fn empty_query_accepts_everything() {
        let filter = parse_filter(&query(None, None, None)).unwrap();
        assert!(filter.symbols.is_none());
        assert!(filter.kinds.is_none());
        assert!(filter.min_priority.is_none());
    }

    #[test]
    fn symbol_is_uppercased() {
        let filter = parse_filter(&query(Some("nifty50"), None, None)).unwrap();
        assert_eq!(filter.symbols, Some(vec!["NIFTY50".to_string()]));
    }

    #[test]
    fn kind_token_parses_wire_name() {
        let filter = parse_filter(&query(None, Some("BOS_ENTRY"), None)).unwrap();
        assert_eq!(filter.kinds, Some(vec![AlertKind::BosEntry]));

        assert!(parse_filter(&query(None, Some("NOT_A_KIND"), None)).is_err());
    }

    #[test]
    fn priority_token_is_case_insensitive() {
        let filter = parse_filter(&query(None, None, Some("high"))).unwrap();
        assert_eq!(filter.min_priority, Some(AlertPriority::High));

        assert!(parse_filter(&query(None, None, Some("urgent"))).is_err());
    }
}
