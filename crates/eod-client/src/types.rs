//! Wire types for the Agave v2 REST API.

use serde::{Deserialize, Serialize};

/// Every Agave response wraps its payload in this envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    pub result: Option<T>,
}

impl<T> Envelope<T> {
    pub fn into_result(self) -> Option<T> {
        self.result
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    pub href: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Links {
    pub history: Option<Link>,
}

/// `result` of a job submission.
#[derive(Debug, Clone, Deserialize)]
pub struct JobResource {
    pub id: String,
    #[serde(rename = "_links")]
    pub links: Option<Links>,
}

/// `result` of a file import.
#[derive(Debug, Clone, Deserialize)]
pub struct FileResource {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(rename = "_links")]
    pub links: Option<Links>,
}

/// Body of a file-management request.
#[derive(Debug, Clone, Serialize)]
pub struct ManageAction<'a> {
    pub action: &'a str,
    pub path: &'a str,
}

/// Response of the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_envelope() {
        let body = r#"{
            "status": "success",
            "message": null,
            "result": {
                "id": "0001414144065563-5056a550b8-0001-007",
                "status": "PENDING",
                "_links": {"history": {"href": "https://agave.iplantc.org/jobs/v2/0001/history"}}
            }
        }"#;
        let envelope: Envelope<JobResource> = serde_json::from_str(body).unwrap();
        let job = envelope.into_result().unwrap();
        assert_eq!(job.id, "0001414144065563-5056a550b8-0001-007");
        assert_eq!(
            job.links.unwrap().history.unwrap().href,
            "https://agave.iplantc.org/jobs/v2/0001/history"
        );
    }

    #[test]
    fn test_token_response_without_refresh() {
        let token: TokenResponse =
            serde_json::from_str(r#"{"access_token": "abc", "token_type": "bearer"}"#).unwrap();
        assert_eq!(token.access_token, "abc");
        assert!(token.refresh_token.is_none());
        assert!(token.expires_in.is_none());
    }
}
