//! Mock timeline for testing
//!
//! A scriptable [`RemoteTimeline`] that serves a fixed history, can be told to
//! fail any operation, and counts every call so tests can assert which remote
//! operations were (or were not) issued.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{Result, TimelineError};
use crate::timeline::RemoteTimeline;
use crate::types::{Account, HistoricalPost, MediaHandle, PostReceipt, StatusRequest};

/// Call counters and captured arguments, shared between clones
#[derive(Debug, Default)]
pub struct MockCalls {
    pub authenticate: usize,
    pub fetch: usize,
    pub upload: usize,
    pub publish: usize,
    pub uploaded: Vec<(PathBuf, String)>,
    pub published: Vec<StatusRequest>,
}

/// Configuration for mock timeline behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub account: Account,
    pub history: Vec<HistoricalPost>,
    pub auth_error: Option<TimelineError>,
    pub fetch_error: Option<TimelineError>,
    pub upload_error: Option<TimelineError>,
    pub publish_error: Option<TimelineError>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            account: Account {
                id: "109".to_string(),
                handle: "mock".to_string(),
                display_name: "Mock Account".to_string(),
            },
            history: Vec::new(),
            auth_error: None,
            fetch_error: None,
            upload_error: None,
            publish_error: None,
        }
    }
}

/// Mock timeline for tests
#[derive(Clone)]
pub struct MockTimeline {
    config: MockConfig,
    calls: Arc<Mutex<MockCalls>>,
}

impl MockTimeline {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            calls: Arc::new(Mutex::new(MockCalls::default())),
        }
    }

    /// A timeline whose account has the given history
    pub fn with_history(history: Vec<HistoricalPost>) -> Self {
        Self::new(MockConfig {
            history,
            ..Default::default()
        })
    }

    /// A timeline that rejects the credential
    pub fn auth_failure(message: &str) -> Self {
        Self::new(MockConfig {
            auth_error: Some(TimelineError::Authentication(message.to_string())),
            ..Default::default()
        })
    }

    /// A timeline whose history fetch fails
    pub fn fetch_failure(message: &str) -> Self {
        Self::new(MockConfig {
            fetch_error: Some(TimelineError::Transport(message.to_string())),
            ..Default::default()
        })
    }

    pub fn failing_upload(mut self, message: &str) -> Self {
        self.config.upload_error = Some(TimelineError::Upload(message.to_string()));
        self
    }

    pub fn failing_publish(mut self, message: &str) -> Self {
        self.config.publish_error = Some(TimelineError::Publish(message.to_string()));
        self
    }

    /// Clear a scripted fetch failure, e.g. to test a retry
    pub fn heal_fetch(&mut self) {
        self.config.fetch_error = None;
    }

    /// Handle onto the shared call log; stays valid after the mock is moved
    pub fn calls(&self) -> Arc<Mutex<MockCalls>> {
        Arc::clone(&self.calls)
    }

    pub fn fetch_count(&self) -> usize {
        self.calls.lock().unwrap().fetch
    }

    pub fn upload_count(&self) -> usize {
        self.calls.lock().unwrap().upload
    }

    pub fn publish_count(&self) -> usize {
        self.calls.lock().unwrap().publish
    }

    pub fn published(&self) -> Vec<StatusRequest> {
        self.calls.lock().unwrap().published.clone()
    }
}

#[async_trait]
impl RemoteTimeline for MockTimeline {
    async fn authenticate(&mut self) -> Result<Account> {
        self.calls.lock().unwrap().authenticate += 1;
        match &self.config.auth_error {
            Some(error) => Err(error.clone().into()),
            None => Ok(self.config.account.clone()),
        }
    }

    async fn fetch_recent_posts(&self, _account_id: &str) -> Result<Vec<HistoricalPost>> {
        self.calls.lock().unwrap().fetch += 1;
        match &self.config.fetch_error {
            Some(error) => Err(error.clone().into()),
            None => Ok(self.config.history.clone()),
        }
    }

    async fn upload_media(&self, file_path: &Path, alt_text: &str) -> Result<MediaHandle> {
        let mut calls = self.calls.lock().unwrap();
        calls.upload += 1;
        calls
            .uploaded
            .push((file_path.to_path_buf(), alt_text.to_string()));

        match &self.config.upload_error {
            Some(error) => Err(error.clone().into()),
            None => Ok(MediaHandle(format!("media-{}", calls.upload))),
        }
    }

    async fn create_status(&self, request: &StatusRequest) -> Result<PostReceipt> {
        let mut calls = self.calls.lock().unwrap();
        calls.publish += 1;
        calls.published.push(request.clone());

        match &self.config.publish_error {
            Some(error) => Err(error.clone().into()),
            None => {
                let id = format!("status-{}", calls.publish);
                Ok(PostReceipt {
                    url: Some(format!("https://mock.example/@mock/{}", id)),
                    id,
                    created_at: Some(Utc::now()),
                })
            }
        }
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn location(&self) -> &str {
        "https://mock.example"
    }
}
