//! スパンとトレース

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// スパンの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    Ok,
    Error,
}

/// スパン（end_time が設定されるまで変更可能）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub operation_name: String,
    pub service_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: SpanStatus,
    pub error_message: Option<String>,
}

impl Span {
    /// 開始済みのスパンを作成
    pub fn new(
        trace_id: impl Into<String>,
        span_id: impl Into<String>,
        operation_name: impl Into<String>,
        service_name: impl Into<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            parent_span_id: None,
            operation_name: operation_name.into(),
            service_name: service_name.into(),
            start_time,
            end_time: None,
            status: SpanStatus::Ok,
            error_message: None,
        }
    }

    /// 親スパンを設定
    pub fn with_parent(mut self, parent_span_id: impl Into<String>) -> Self {
        self.parent_span_id = Some(parent_span_id.into());
        self
    }

    /// 終了時刻を設定
    pub fn finished_at(mut self, end_time: DateTime<Utc>) -> Self {
        self.end_time = Some(end_time);
        self
    }

    /// エラーとしてマーク
    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.status = SpanStatus::Error;
        self.error_message = Some(message.into());
        self
    }

    pub fn is_completed(&self) -> bool {
        self.end_time.is_some()
    }

    pub fn is_error(&self) -> bool {
        self.status == SpanStatus::Error
    }

    /// 所要時間（ミリ秒）
    pub fn duration_ms(&self) -> Option<f64> {
        self.end_time
            .map(|end| (end - self.start_time).num_microseconds().unwrap_or(i64::MAX) as f64 / 1000.0)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.trace_id.is_empty() || self.span_id.is_empty() {
            return Err(Error::InvalidState(
                "span requires non-empty trace_id and span_id".to_string(),
            ));
        }
        if let Some(end) = self.end_time {
            if end < self.start_time {
                return Err(Error::InvalidState(format!(
                    "span {} ends before it starts",
                    self.span_id
                )));
            }
        }
        Ok(())
    }

    /// 開いているスパンを終了
    pub(crate) fn end(
        &mut self,
        end_time: DateTime<Utc>,
        status: SpanStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        if self.is_completed() {
            return Err(Error::InvalidState(format!(
                "span {} already ended",
                self.span_id
            )));
        }
        if end_time < self.start_time {
            return Err(Error::InvalidState(format!(
                "span {} ends before it starts",
                self.span_id
            )));
        }
        self.end_time = Some(end_time);
        self.status = status;
        self.error_message = error_message;
        Ok(())
    }
}

/// 根本原因と判定されたスパン
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCause {
    pub service_name: String,
    pub operation_name: String,
    pub span_id: String,
    pub error_message: Option<String>,
    /// ルートからの深さ（ルート = 0）
    pub depth: usize,
}

/// 同じ trace_id を持つスパンの集合
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub trace_id: String,
    pub spans: Vec<Span>,
}

impl Trace {
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            spans: Vec::new(),
        }
    }

    pub fn span_count(&self) -> usize {
        self.spans.len()
    }

    pub fn service_count(&self) -> usize {
        self.spans
            .iter()
            .map(|s| s.service_name.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn error_count(&self) -> usize {
        self.spans.iter().filter(|s| s.is_error()).count()
    }

    /// 最初の開始から最後の終了まで（終了スパンがなければ None）
    pub fn duration_ms(&self) -> Option<f64> {
        let start = self.spans.iter().map(|s| s.start_time).min()?;
        let end = self.spans.iter().filter_map(|s| s.end_time).max()?;
        Some((end - start).num_microseconds().unwrap_or(i64::MAX) as f64 / 1000.0)
    }

    pub fn span(&self, span_id: &str) -> Option<&Span> {
        self.spans.iter().find(|s| s.span_id == span_id)
    }

    pub(crate) fn span_mut(&mut self, span_id: &str) -> Option<&mut Span> {
        self.spans.iter_mut().find(|s| s.span_id == span_id)
    }

    /// 親チェーンをたどった深さ（循環や欠落した親で打ち切り）
    fn depth_of(&self, span: &Span, by_id: &HashMap<&str, &Span>) -> usize {
        let mut depth = 0;
        let mut current = span;
        while let Some(parent) = current
            .parent_span_id
            .as_deref()
            .and_then(|id| by_id.get(id).copied())
        {
            depth += 1;
            if depth > self.spans.len() {
                break;
            }
            current = parent;
        }
        depth
    }

    /// エラーを出した子を持たないエラースパンのうち最も深いもの（同じ深さなら開始が早い方）
    pub fn root_cause(&self) -> Option<RootCause> {
        let by_id: HashMap<&str, &Span> =
            self.spans.iter().map(|s| (s.span_id.as_str(), s)).collect();
        let erroring_parents: HashSet<&str> = self
            .spans
            .iter()
            .filter(|s| s.is_error())
            .filter_map(|s| s.parent_span_id.as_deref())
            .collect();

        self.spans
            .iter()
            .filter(|s| s.is_error() && !erroring_parents.contains(s.span_id.as_str()))
            .map(|s| (self.depth_of(s, &by_id), s))
            .min_by(|(da, a), (db, b)| db.cmp(da).then(a.start_time.cmp(&b.start_time)))
            .map(|(depth, span)| RootCause {
                service_name: span.service_name.clone(),
                operation_name: span.operation_name.clone(),
                span_id: span.span_id.clone(),
                error_message: span.error_message.clone(),
                depth,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn base() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_span_end_only_once() {
        let mut span = Span::new("t1", "s1", "GET /", "gateway", base());
        span.end(base() + Duration::milliseconds(5), SpanStatus::Ok, None)
            .unwrap();
        assert_eq!(span.duration_ms(), Some(5.0));
        assert!(matches!(
            span.end(base() + Duration::milliseconds(9), SpanStatus::Ok, None),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_validate_rejects_inverted_times() {
        let span = Span::new("t", "s", "op", "svc", base()).finished_at(base() - Duration::seconds(1));
        assert!(span.validate().is_err());
        assert!(Span::new("", "s", "op", "svc", base()).validate().is_err());
    }

    #[test]
    fn test_error_child_under_ok_parent() {
        let mut trace = Trace::new("t1");
        trace.spans.push(
            Span::new("t1", "root", "checkout", "frontend", base())
                .finished_at(base() + Duration::milliseconds(100)),
        );
        trace.spans.push(
            Span::new("t1", "child", "charge", "payments", base() + Duration::milliseconds(10))
                .with_parent("root")
                .finished_at(base() + Duration::milliseconds(60))
                .failed("card declined"),
        );

        let cause = trace.root_cause().unwrap();
        assert_eq!(cause.service_name, "payments");
        assert_eq!(cause.depth, 1);
        assert_eq!(trace.service_count(), 2);
        assert_eq!(trace.duration_ms(), Some(100.0));
    }

    #[test]
    fn test_error_propagated_to_parent_blames_leaf() {
        let mut trace = Trace::new("t");
        trace.spans.push(Span::new("t", "a", "api", "gateway", base()).failed("upstream"));
        trace.spans.push(
            Span::new("t", "b", "query", "orders", base() + Duration::milliseconds(1))
                .with_parent("a")
                .failed("upstream"),
        );
        trace.spans.push(
            Span::new("t", "c", "select", "db", base() + Duration::milliseconds(2))
                .with_parent("b")
                .failed("timeout"),
        );

        assert_eq!(trace.root_cause().unwrap().service_name, "db");
    }

    #[test]
    fn test_tie_picks_earliest_start() {
        let mut trace = Trace::new("t");
        trace.spans.push(Span::new("t", "root", "api", "gateway", base()));
        trace.spans.push(
            Span::new("t", "late", "b", "cache", base() + Duration::milliseconds(20))
                .with_parent("root")
                .failed("miss"),
        );
        trace.spans.push(
            Span::new("t", "early", "a", "search", base() + Duration::milliseconds(5))
                .with_parent("root")
                .failed("boom"),
        );

        assert_eq!(trace.root_cause().unwrap().service_name, "search");
        assert!(Trace::new("empty").root_cause().is_none());
    }
}
