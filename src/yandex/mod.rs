//! Yandex Cloud implementation of the compute API.

mod wire;

use std::time::Duration;

use reqwest::{Response, StatusCode};
use tracing::{error, info};

use crate::api::{ApiError, ApiFuture, ComputeApi};
use crate::model::{InstanceDescriptor, Operation, OperationStatus, SnapshotRecord};
use crate::retry::RetryPolicy;
use wire::{
    CreateSnapshotBody, ErrorBody, InstanceBody, OperationBody, SnapshotListBody,
    TokenRequestBody, TokenResponseBody,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const COMPUTE_URL: &str = "https://compute.api.cloud.yandex.net/compute/v1";
const OPERATION_URL: &str = "https://operation.api.cloud.yandex.net/operations";
const IAM_URL: &str = "https://iam.api.cloud.yandex.net/iam/v1/tokens";

/// Service endpoint bases, overridable so tests can target a mock server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Endpoints {
    /// Compute API base (instances, snapshots).
    pub compute: String,
    /// Operations API base.
    pub operations: String,
    /// IAM token-exchange endpoint.
    pub iam: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            compute: COMPUTE_URL.to_owned(),
            operations: OPERATION_URL.to_owned(),
            iam: IAM_URL.to_owned(),
        }
    }
}

/// Compute client holding the bearer token for this process run.
///
/// The IAM token is exchanged once at construction; a new client picks up a
/// fresh token.
#[derive(Clone, Debug)]
pub struct YandexCompute {
    http: reqwest::Client,
    endpoints: Endpoints,
    iam_token: String,
}

impl YandexCompute {
    /// Exchanges the OAuth token and returns a ready client against the
    /// production endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the token exchange fails after retries.
    pub async fn connect(oauth_token: &str) -> Result<Self, ApiError> {
        Self::connect_with(oauth_token, Endpoints::default()).await
    }

    /// Exchanges the OAuth token against explicit endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] when the token exchange fails after retries.
    pub async fn connect_with(oauth_token: &str, endpoints: Endpoints) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let iam_token = RetryPolicy::default()
            .execute(|| Self::exchange_token(&http, &endpoints.iam, oauth_token))
            .await?;
        info!("IAM token obtained");

        Ok(Self {
            http,
            endpoints,
            iam_token,
        })
    }

    async fn exchange_token(
        http: &reqwest::Client,
        iam_url: &str,
        oauth_token: &str,
    ) -> Result<String, ApiError> {
        let response = http
            .post(iam_url)
            .json(&TokenRequestBody {
                yandex_passport_oauth_token: oauth_token,
            })
            .send()
            .await?;
        let body: TokenResponseBody = check(response, "token exchange").await?;
        Ok(body.iam_token)
    }

    fn instance_url(&self, instance_id: &str) -> String {
        format!("{}/instances/{instance_id}", self.endpoints.compute)
    }

    fn snapshots_url(&self) -> String {
        format!("{}/snapshots", self.endpoints.compute)
    }

    async fn instance_action(
        &self,
        instance_id: &str,
        action: &str,
    ) -> Result<Operation, ApiError> {
        let url = format!("{}:{action}", self.instance_url(instance_id));
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.iam_token)
            .send()
            .await?;
        let body: OperationBody = check(response, action).await?;
        Ok(issued(body, action))
    }
}

/// Converts a response body into an issued operation, defaulting the
/// description to the action name when the remote side omits one.
fn issued(body: OperationBody, action: &str) -> Operation {
    let description = if body.description.is_empty() {
        action.to_owned()
    } else {
        body.description
    };
    Operation::Issued {
        id: body.id,
        description,
    }
}

/// Decodes a 2xx body, mapping non-2xx statuses onto the error taxonomy.
async fn check<T>(response: Response, context: &str) -> Result<T, ApiError>
where
    T: serde::de::DeserializeOwned,
{
    let status = response.status();
    if status.is_success() {
        return response.json::<T>().await.map_err(ApiError::from);
    }

    let message = response
        .json::<ErrorBody>()
        .await
        .map(|body| body.message)
        .unwrap_or_default();
    error!(status = status.as_u16(), %message, context, "remote API rejected the request");
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ApiError::Quota { message });
    }
    Err(ApiError::Rejected {
        status: status.as_u16(),
        message,
    })
}

impl ComputeApi for YandexCompute {
    fn get_instance<'a>(
        &'a self,
        instance_id: &'a str,
    ) -> ApiFuture<'a, Option<InstanceDescriptor>> {
        Box::pin(async move {
            let response = self
                .http
                .get(self.instance_url(instance_id))
                .bearer_auth(&self.iam_token)
                .send()
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            let body: InstanceBody = check(response, "get instance").await?;
            Ok(Some(body.into()))
        })
    }

    fn start_instance<'a>(&'a self, instance_id: &'a str) -> ApiFuture<'a, Operation> {
        Box::pin(self.instance_action(instance_id, "start"))
    }

    fn stop_instance<'a>(&'a self, instance_id: &'a str) -> ApiFuture<'a, Operation> {
        Box::pin(self.instance_action(instance_id, "stop"))
    }

    fn create_snapshot<'a>(
        &'a self,
        folder_id: &'a str,
        disk_id: &'a str,
        name: &'a str,
    ) -> ApiFuture<'a, Operation> {
        Box::pin(async move {
            let response = self
                .http
                .post(self.snapshots_url())
                .bearer_auth(&self.iam_token)
                .json(&CreateSnapshotBody {
                    folder_id,
                    disk_id,
                    name,
                })
                .send()
                .await?;
            let body: OperationBody = check(response, "create snapshot").await?;
            Ok(issued(body, "create snapshot"))
        })
    }

    fn delete_snapshot<'a>(&'a self, snapshot_id: &'a str) -> ApiFuture<'a, Operation> {
        Box::pin(async move {
            let url = format!("{}/{snapshot_id}", self.snapshots_url());
            let response = self
                .http
                .delete(&url)
                .bearer_auth(&self.iam_token)
                .send()
                .await?;
            let body: OperationBody = check(response, "delete snapshot").await?;
            Ok(issued(body, "delete snapshot"))
        })
    }

    fn list_snapshots<'a>(&'a self, folder_id: &'a str) -> ApiFuture<'a, Vec<SnapshotRecord>> {
        Box::pin(async move {
            let response = self
                .http
                .get(self.snapshots_url())
                .query(&[("folderId", folder_id)])
                .bearer_auth(&self.iam_token)
                .send()
                .await?;
            let body: SnapshotListBody = check(response, "list snapshots").await?;
            Ok(body.snapshots.into_iter().map(Into::into).collect())
        })
    }

    fn get_operation<'a>(&'a self, operation_id: &'a str) -> ApiFuture<'a, OperationStatus> {
        Box::pin(async move {
            let url = format!("{}/{operation_id}", self.endpoints.operations);
            let response = self
                .http
                .get(&url)
                .bearer_auth(&self.iam_token)
                .send()
                .await?;
            check(response, "get operation").await
        })
    }
}
