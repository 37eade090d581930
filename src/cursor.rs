//! Typed pagination cursors and the cross-provider resume policy (C6).
//!
//! Modeled as a closed sum type (spec §9 "tagged unions... compile-time rejected
//! default arms") rather than an opaque string, so the resume policy in
//! `resolve_resume_cursor` can match exhaustively.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum PaginationCursor {
    BlockNumber { value: u64 },
    Timestamp { value: u64 },
    PageToken { value: String, provider_name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CursorTypeTag {
    BlockNumber,
    Timestamp,
    PageToken,
}

impl PaginationCursor {
    pub fn type_tag(&self) -> CursorTypeTag {
        match self {
            PaginationCursor::BlockNumber { .. } => CursorTypeTag::BlockNumber,
            PaginationCursor::Timestamp { .. } => CursorTypeTag::Timestamp,
            PaginationCursor::PageToken { .. } => CursorTypeTag::PageToken,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorStateMetadata {
    pub provider_name: String,
    pub updated_at: DateTime<Utc>,
    pub is_complete: Option<bool>,
    pub fetch_status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorState {
    pub primary: PaginationCursor,
    pub alternatives: Vec<PaginationCursor>,
    pub last_transaction_id: Option<String>,
    pub total_fetched: u64,
    pub metadata: CursorStateMetadata,
}

/// What the native provider call should be invoked with: either a provider's
/// own opaque page token, or a translated numeric cursor, or "start fresh".
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeRequest {
    PageToken(String),
    BlockNumber(u64),
    Timestamp(u64),
    FromBeginning,
}

/// Per-provider replay window applied only on cross-provider (failover) resume,
/// never on same-provider resume (spec §4.5 — "never applied on same-provider
/// resume, this prevents double-counting").
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayWindow {
    pub blocks: u64,
    pub seconds: u64,
}

/// Implements the resume policy from spec §4.5:
/// 1. same-provider page-token resume takes priority and applies no replay window;
/// 2. otherwise scan primary then alternatives for the first cursor whose type is
///    supported, applying the replay window only when `is_failover`;
/// 3. otherwise start from the beginning.
pub fn resolve_resume_cursor(
    resume_cursor: Option<&CursorState>,
    provider_name: &str,
    supported_cursor_types: &[CursorTypeTag],
    is_failover: bool,
    replay_window: ReplayWindow,
) -> ResumeRequest {
    let Some(state) = resume_cursor else {
        return ResumeRequest::FromBeginning;
    };

    if let PaginationCursor::PageToken {
        value,
        provider_name: cursor_provider,
    } = &state.primary
    {
        if cursor_provider == provider_name
            && !is_failover
            && supported_cursor_types.contains(&CursorTypeTag::PageToken)
        {
            return ResumeRequest::PageToken(value.clone());
        }
    }

    let candidates = std::iter::once(&state.primary).chain(state.alternatives.iter());
    for candidate in candidates {
        match candidate {
            PaginationCursor::BlockNumber { value }
                if supported_cursor_types.contains(&CursorTypeTag::BlockNumber) =>
            {
                let applied = if is_failover {
                    value.saturating_sub(replay_window.blocks)
                } else {
                    *value
                };
                return ResumeRequest::BlockNumber(applied);
            }
            PaginationCursor::Timestamp { value }
                if supported_cursor_types.contains(&CursorTypeTag::Timestamp) =>
            {
                let applied = if is_failover {
                    value.saturating_sub(replay_window.seconds * 1000)
                } else {
                    *value
                };
                return ResumeRequest::Timestamp(applied);
            }
            _ => continue,
        }
    }

    ResumeRequest::FromBeginning
}

/// Serializes a `CursorState` to the opaque JSON blob persisted in
/// `external_transaction_data.cursor` / the session metadata.
pub fn serialize_cursor_state(state: &CursorState) -> serde_json::Value {
    serde_json::to_value(state).unwrap_or(serde_json::Value::Null)
}

pub fn deserialize_cursor_state(value: &serde_json::Value) -> Option<CursorState> {
    serde_json::from_value(value.clone()).ok()
}

/// Translates a resolved [`ResumeRequest`] into the flat key/value map a
/// provider's native pagination parameter expects (spec §4.5 step 1's
/// `{pageToken: value}` shape, generalized).
pub fn resume_request_to_params(req: &ResumeRequest) -> HashMap<String, String> {
    let mut params = HashMap::new();
    match req {
        ResumeRequest::PageToken(v) => {
            params.insert("pageToken".to_string(), v.clone());
        }
        ResumeRequest::BlockNumber(v) => {
            params.insert("blockNumber".to_string(), v.to_string());
        }
        ResumeRequest::Timestamp(v) => {
            params.insert("timestamp".to_string(), v.to_string());
        }
        ResumeRequest::FromBeginning => {}
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(primary: PaginationCursor, alternatives: Vec<PaginationCursor>) -> CursorState {
        CursorState {
            primary,
            alternatives,
            last_transaction_id: None,
            total_fetched: 0,
            metadata: CursorStateMetadata {
                provider_name: "alchemy".to_string(),
                updated_at: Utc::now(),
                is_complete: Some(false),
                fetch_status: None,
            },
        }
    }

    #[test]
    fn cross_provider_failover_applies_replay_window() {
        // spec.md scenario 5
        let state = state_with(
            PaginationCursor::PageToken {
                value: "abc".to_string(),
                provider_name: "alchemy".to_string(),
            },
            vec![PaginationCursor::BlockNumber { value: 15_000_000 }],
        );

        let result = resolve_resume_cursor(
            Some(&state),
            "moralis",
            &[CursorTypeTag::BlockNumber],
            true,
            ReplayWindow {
                blocks: 2,
                seconds: 0,
            },
        );
        assert_eq!(result, ResumeRequest::BlockNumber(14_999_998));
    }

    #[test]
    fn same_provider_resume_uses_page_token_with_no_replay() {
        let state = state_with(
            PaginationCursor::PageToken {
                value: "abc".to_string(),
                provider_name: "alchemy".to_string(),
            },
            vec![PaginationCursor::BlockNumber { value: 15_000_000 }],
        );

        let result = resolve_resume_cursor(
            Some(&state),
            "alchemy",
            &[CursorTypeTag::PageToken, CursorTypeTag::BlockNumber],
            false,
            ReplayWindow {
                blocks: 2,
                seconds: 0,
            },
        );
        assert_eq!(result, ResumeRequest::PageToken("abc".to_string()));
    }

    #[test]
    fn replay_window_never_goes_below_zero() {
        let state = state_with(PaginationCursor::BlockNumber { value: 1 }, vec![]);
        let result = resolve_resume_cursor(
            Some(&state),
            "moralis",
            &[CursorTypeTag::BlockNumber],
            true,
            ReplayWindow {
                blocks: 100,
                seconds: 0,
            },
        );
        assert_eq!(result, ResumeRequest::BlockNumber(0));
    }

    #[test]
    fn no_matching_cursor_type_starts_from_beginning() {
        let state = state_with(PaginationCursor::BlockNumber { value: 100 }, vec![]);
        let result = resolve_resume_cursor(
            Some(&state),
            "some_provider",
            &[CursorTypeTag::Timestamp],
            true,
            ReplayWindow::default(),
        );
        assert_eq!(result, ResumeRequest::FromBeginning);
    }

    #[test]
    fn cursor_round_trips_through_json() {
        let state = state_with(
            PaginationCursor::Timestamp { value: 123 },
            vec![PaginationCursor::BlockNumber { value: 99 }],
        );
        let json = serialize_cursor_state(&state);
        let restored = deserialize_cursor_state(&json).unwrap();
        assert_eq!(restored.primary, state.primary);
        assert_eq!(restored.alternatives, state.alternatives);
    }

    #[test]
    fn no_resume_cursor_starts_from_beginning() {
        let result = resolve_resume_cursor(
            None,
            "alchemy",
            &[CursorTypeTag::BlockNumber],
            false,
            ReplayWindow::default(),
        );
        assert_eq!(result, ResumeRequest::FromBeginning);
    }
}
