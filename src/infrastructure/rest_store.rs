use crate::domain::models::{
    CalendarEvent, CalendarEventDraft, CalendarEventPatch, DayDetails, EventType, Project,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::record_store::{
    sort_events, DayDetailsStore, EventStore, ProjectDraft, ProjectStore,
};
use crate::infrastructure::retry::{retry_with_backoff, RetryPolicy};
use crate::infrastructure::row_mapper::{
    decode_day_details, decode_event, decode_project, encode_day_details, encode_draft,
    encode_patch, CalendarEventRow, DayDetailsRow, ProjectRow,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use url::Url;

const EVENTS_TABLE: &str = "calendar_events";
const PROJECTS_TABLE: &str = "projects";
const DAY_DETAILS_TABLE: &str = "day_details";
const RETURN_REPRESENTATION: &str = "return=representation";
const MERGE_DUPLICATES: &str = "resolution=merge-duplicates,return=representation";

/// Record stores backed by a PostgREST-style HTTP API (`/rest/v1/<table>`
/// with `apikey` and bearer authentication).
#[derive(Debug, Clone)]
pub struct ReqwestRestStore {
    client: Client,
    base_url: Url,
    api_key: String,
    retry_policy: RetryPolicy,
}

#[derive(Debug, serde::Serialize)]
struct ProjectInsert<'a> {
    name: &'a str,
    color: &'a str,
}

impl ReqwestRestStore {
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, InfraError> {
        let trimmed = base_url.trim();
        // Url::join drops the last segment unless the base ends with '/'.
        let normalized = if trimmed.ends_with('/') {
            trimmed.to_string()
        } else {
            format!("{trimmed}/")
        };
        let base_url = Url::parse(&normalized)
            .map_err(|error| InfraError::InvalidConfig(format!("invalid restUrl '{trimmed}': {error}")))?;
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(InfraError::Credential("rest api key must not be empty".to_string()));
        }

        Ok(Self {
            client: Client::new(),
            base_url,
            api_key,
            retry_policy: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    fn table_url(&self, table: &str) -> Result<Url, InfraError> {
        self.base_url
            .join(table)
            .map_err(|error| InfraError::InvalidConfig(format!("invalid table url for {table}: {error}")))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    fn http_error(status: StatusCode, body: &str) -> InfraError {
        if status == StatusCode::NOT_FOUND {
            return InfraError::NotFound(format!("rest store: http 404; body={body}"));
        }
        let message = if body.trim().is_empty() {
            format!("rest store error: http {}", status.as_u16())
        } else {
            format!("rest store error: http {}; body={body}", status.as_u16())
        };
        InfraError::StoreUnavailable(message)
    }

    /// Sends the request built by `build` under the retry policy and returns
    /// the body of a successful response.
    async fn execute<F>(&self, label: &str, build: F) -> Result<String, InfraError>
    where
        F: Fn() -> Result<RequestBuilder, InfraError> + Send + Sync,
    {
        let build = &build;
        retry_with_backoff(&self.retry_policy, label, || async move {
            let response = build()?.send().await.map_err(|error| {
                InfraError::StoreUnavailable(format!("network error while {label}: {error}"))
            })?;

            let status = response.status();
            let body = response.text().await.map_err(|error| {
                InfraError::StoreUnavailable(format!("network error reading {label} response: {error}"))
            })?;

            if !status.is_success() {
                return Err(Self::http_error(status, &body));
            }
            Ok(body)
        })
        .await
    }

    fn parse_rows<T: serde::de::DeserializeOwned>(label: &str, body: &str) -> Result<Vec<T>, InfraError> {
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(body).map_err(|error| {
            InfraError::StoreUnavailable(format!("invalid {label} payload: {error}; body={body}"))
        })
    }

    fn first_event(label: &str, body: &str) -> Result<CalendarEvent, InfraError> {
        Self::parse_rows::<CalendarEventRow>(label, body)?
            .into_iter()
            .next()
            .ok_or_else(|| InfraError::StoreUnavailable(format!("{label} response did not include a row")))
            .and_then(decode_event)
    }
}

#[async_trait]
impl EventStore for ReqwestRestStore {
    async fn create(&self, draft: &CalendarEventDraft) -> Result<CalendarEvent, InfraError> {
        draft.validate().map_err(InfraError::Validation)?;
        let url = self.table_url(EVENTS_TABLE)?;
        let payload = encode_draft(draft);

        let body = self
            .execute("creating calendar event", || {
                Ok(self
                    .request(Method::POST, url.clone())
                    .header("Prefer", RETURN_REPRESENTATION)
                    .json(&payload))
            })
            .await?;
        Self::first_event("calendar event create", &body)
    }

    async fn update(
        &self,
        id: &str,
        patch: &CalendarEventPatch,
    ) -> Result<CalendarEvent, InfraError> {
        let url = self.table_url(EVENTS_TABLE)?;
        let filter = format!("eq.{id}");
        let payload = encode_patch(patch);

        let body = self
            .execute("updating calendar event", || {
                Ok(self
                    .request(Method::PATCH, url.clone())
                    .query(&[("id", filter.as_str())])
                    .header("Prefer", RETURN_REPRESENTATION)
                    .json(&payload))
            })
            .await?;

        // PostgREST answers an unmatched filter with an empty array.
        let rows = Self::parse_rows::<CalendarEventRow>("calendar event update", &body)?;
        match rows.into_iter().next() {
            Some(row) => decode_event(row),
            None => Err(InfraError::NotFound(format!("calendar event {id}"))),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<CalendarEvent>, InfraError> {
        let url = self.table_url(EVENTS_TABLE)?;
        let filter = format!("eq.{id}");
        let body = self
            .execute("fetching calendar event", || {
                Ok(self
                    .request(Method::GET, url.clone())
                    .query(&[("select", "*"), ("id", filter.as_str())]))
            })
            .await?;

        Self::parse_rows::<CalendarEventRow>("calendar event", &body)?
            .into_iter()
            .next()
            .map(decode_event)
            .transpose()
    }

    async fn delete(&self, id: &str) -> Result<(), InfraError> {
        let url = self.table_url(EVENTS_TABLE)?;
        let filter = format!("eq.{id}");
        self.execute("deleting calendar event", || {
            Ok(self
                .request(Method::DELETE, url.clone())
                .query(&[("id", filter.as_str())]))
        })
        .await?;
        Ok(())
    }

    async fn query_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<CalendarEvent>, InfraError> {
        let url = self.table_url(EVENTS_TABLE)?;
        let lower = format!("gte.{start}");
        let upper = format!("lte.{end}");
        let body = self
            .execute("listing calendar events", || {
                Ok(self.request(Method::GET, url.clone()).query(&[
                    ("select", "*"),
                    ("date", lower.as_str()),
                    ("date", upper.as_str()),
                    ("order", "date.asc,start_time.asc"),
                ]))
            })
            .await?;

        let mut events = Vec::new();
        for row in Self::parse_rows::<CalendarEventRow>("calendar events", &body)? {
            match decode_event(row) {
                Ok(event) => events.push(event),
                Err(error) => tracing::warn!(error = %error, "skipping malformed calendar event row"),
            }
        }
        sort_events(&mut events);
        Ok(events)
    }
}

#[async_trait]
impl ProjectStore for ReqwestRestStore {
    async fn list(&self) -> Result<Vec<Project>, InfraError> {
        let url = self.table_url(PROJECTS_TABLE)?;
        let body = self
            .execute("listing projects", || {
                Ok(self
                    .request(Method::GET, url.clone())
                    .query(&[("select", "*"), ("order", "name.asc")]))
            })
            .await?;
        Ok(Self::parse_rows::<ProjectRow>("projects", &body)?
            .into_iter()
            .map(decode_project)
            .collect())
    }

    async fn create(&self, draft: &ProjectDraft) -> Result<Project, InfraError> {
        let url = self.table_url(PROJECTS_TABLE)?;
        let name = draft.name.trim();
        let payload = ProjectInsert {
            name,
            color: draft.color.as_str(),
        };
        let body = self
            .execute("creating project", || {
                Ok(self
                    .request(Method::POST, url.clone())
                    .header("Prefer", RETURN_REPRESENTATION)
                    .json(&payload))
            })
            .await?;

        Self::parse_rows::<ProjectRow>("project create", &body)?
            .into_iter()
            .next()
            .map(decode_project)
            .ok_or_else(|| InfraError::StoreUnavailable("project create response did not include a row".to_string()))
    }

    async fn delete(&self, id: &str) -> Result<(), InfraError> {
        let events_url = self.table_url(EVENTS_TABLE)?;
        let projects_url = self.table_url(PROJECTS_TABLE)?;
        let project_filter = format!("eq.{id}");
        let detach = serde_json::json!({
            "project_id": null,
            "type": EventType::Event.as_str(),
        });

        self.execute("detaching project events", || {
            Ok(self
                .request(Method::PATCH, events_url.clone())
                .query(&[("project_id", project_filter.as_str())])
                .json(&detach))
        })
        .await?;
        self.execute("deleting project", || {
            Ok(self
                .request(Method::DELETE, projects_url.clone())
                .query(&[("id", project_filter.as_str())]))
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DayDetailsStore for ReqwestRestStore {
    async fn get(&self, date: NaiveDate) -> Result<Option<DayDetails>, InfraError> {
        let url = self.table_url(DAY_DETAILS_TABLE)?;
        let filter = format!("eq.{date}");
        let body = self
            .execute("fetching day details", || {
                Ok(self
                    .request(Method::GET, url.clone())
                    .query(&[("select", "*"), ("date", filter.as_str())]))
            })
            .await?;
        Self::parse_rows::<DayDetailsRow>("day details", &body)?
            .into_iter()
            .next()
            .map(decode_day_details)
            .transpose()
    }

    async fn upsert(&self, details: &DayDetails) -> Result<DayDetails, InfraError> {
        let url = self.table_url(DAY_DETAILS_TABLE)?;
        let payload = encode_day_details(details);
        let body = self
            .execute("saving day details", || {
                Ok(self
                    .request(Method::POST, url.clone())
                    .query(&[("on_conflict", "date")])
                    .header("Prefer", MERGE_DUPLICATES)
                    .json(&payload))
            })
            .await?;
        match Self::parse_rows::<DayDetailsRow>("day details upsert", &body)?
            .into_iter()
            .next()
        {
            Some(row) => decode_day_details(row),
            None => Ok(details.clone()),
        }
    }

    async fn query_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DayDetails>, InfraError> {
        let url = self.table_url(DAY_DETAILS_TABLE)?;
        let lower = format!("gte.{start}");
        let upper = format!("lte.{end}");
        let body = self
            .execute("listing day details", || {
                Ok(self.request(Method::GET, url.clone()).query(&[
                    ("select", "*"),
                    ("date", lower.as_str()),
                    ("date", upper.as_str()),
                    ("order", "date.asc"),
                ]))
            })
            .await?;
        Self::parse_rows::<DayDetailsRow>("day details", &body)?
            .into_iter()
            .map(decode_day_details)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_urls_keep_the_rest_prefix() {
        let store = ReqwestRestStore::new("https://demo.supabase.co/rest/v1", "anon-key").expect("store");
        assert_eq!(
            store.table_url(EVENTS_TABLE).expect("url").as_str(),
            "https://demo.supabase.co/rest/v1/calendar_events"
        );
        assert_eq!(
            store.table_url(DAY_DETAILS_TABLE).expect("url").as_str(),
            "https://demo.supabase.co/rest/v1/day_details"
        );
    }

    #[test]
    fn new_rejects_blank_key_and_bad_url() {
        assert!(matches!(
            ReqwestRestStore::new("https://demo.supabase.co/rest/v1/", "  "),
            Err(InfraError::Credential(_))
        ));
        assert!(matches!(
            ReqwestRestStore::new("not a url", "anon-key"),
            Err(InfraError::InvalidConfig(_))
        ));
    }

    #[test]
    fn server_errors_are_transient_and_client_errors_are_not() {
        assert!(ReqwestRestStore::http_error(StatusCode::BAD_GATEWAY, "").is_transient());
        assert!(!ReqwestRestStore::http_error(StatusCode::BAD_REQUEST, "bad column").is_transient());
        assert!(matches!(
            ReqwestRestStore::http_error(StatusCode::NOT_FOUND, ""),
            InfraError::NotFound(_)
        ));
    }

    #[test]
    fn empty_body_parses_as_no_rows() {
        let rows = ReqwestRestStore::parse_rows::<ProjectRow>("projects", "  ").expect("rows");
        assert!(rows.is_empty());
    }
}
