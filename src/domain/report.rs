//! Usage records and the batched wire payload.
//!
//! Payloads are `application/x-www-form-urlencoded` bodies with two header
//! fields followed by an indexed array of transactions:
//!
//! ```text
//! service_id=42&provider_key=tok
//!   &transactions[0][user_key]=abc&transactions[0][usage][hits]=1
//!   &transactions[1][user_key]=abc&transactions[1][usage][hits]=2
//! ```
//!
//! Field names are fixed by the backend, including the `referer` spelling.

use crate::domain::credentials::Identity;
use crate::domain::error::RecordError;
use crate::domain::fingerprint::BucketKey;
use crate::domain::usage::MetricDeltaMap;
use serde::Deserialize;
use url::form_urlencoded;

pub const SERVICE_ID: &str = "service_id";
pub const PROVIDER_KEY: &str = "provider_key";
pub const SERVICE_TOKEN: &str = "service_token";
pub const TRANSACTIONS: &str = "transactions";
pub const USER_KEY: &str = "user_key";
pub const APP_ID: &str = "app_id";
pub const APP_KEY: &str = "app_key";
pub const REFERER: &str = "referer";
pub const USER_ID: &str = "user_id";
pub const USAGE: &str = "usage";
pub const LOG: &str = "log";
pub const CODE: &str = "code";

/// Content type of encoded payloads.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Name under which the service token is sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceAuthParam {
    #[default]
    ProviderKey,
    ServiceToken,
}

impl ServiceAuthParam {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAuthParam::ProviderKey => PROVIDER_KEY,
            ServiceAuthParam::ServiceToken => SERVICE_TOKEN,
        }
    }
}

/// One unit of usage to report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRecord {
    service_token: String,
    service_id: String,
    identity: Identity,
    usage: MetricDeltaMap,
    response_code: Option<u16>,
    bucket: BucketKey,
}

impl ReportRecord {
    pub fn new(
        service_token: impl Into<String>,
        service_id: impl Into<String>,
        identity: Identity,
        usage: MetricDeltaMap,
    ) -> Self {
        let service_id = service_id.into();
        let bucket = BucketKey::new(
            service_id.clone(),
            identity.credential().unwrap_or_default(),
        );
        Self {
            service_token: service_token.into(),
            service_id,
            identity,
            usage,
            response_code: None,
            bucket,
        }
    }

    /// Attach the upstream response status.
    pub fn with_response_code(mut self, code: Option<u16>) -> Self {
        self.response_code = code;
        self
    }

    pub fn service_token(&self) -> &str {
        &self.service_token
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn usage(&self) -> &MetricDeltaMap {
        &self.usage
    }

    pub fn response_code(&self) -> Option<u16> {
        self.response_code
    }

    pub fn bucket(&self) -> &BucketKey {
        &self.bucket
    }

    /// Check the record can be encoded on its own.
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.service_id.is_empty() {
            return Err(RecordError::MissingServiceField(SERVICE_ID));
        }
        if self.service_token.is_empty() {
            return Err(RecordError::MissingServiceField(SERVICE_TOKEN));
        }
        if self.identity.credential().is_none() {
            return Err(RecordError::MissingCredential);
        }
        if self.usage.is_empty() {
            return Err(RecordError::EmptyUsage);
        }
        Ok(())
    }

    fn encode_into<T>(&self, index: usize, form: &mut form_urlencoded::Serializer<'_, T>)
    where
        T: form_urlencoded::Target,
    {
        let prefix = format!("{TRANSACTIONS}[{index}]");
        let identity = &self.identity;
        let fields = [
            (USER_KEY, &identity.user_key),
            (APP_ID, &identity.app_id),
            (APP_KEY, &identity.app_key),
            (REFERER, &identity.referer),
            (USER_ID, &identity.user_id),
        ];
        for (name, value) in fields {
            if let Some(value) = value {
                form.append_pair(&format!("{prefix}[{name}]"), value);
            }
        }
        for (metric, delta) in self.usage.iter() {
            form.append_pair(&format!("{prefix}[{USAGE}][{metric}]"), &delta.to_string());
        }
        if let Some(code) = self.response_code {
            form.append_pair(&format!("{prefix}[{LOG}][{CODE}]"), &code.to_string());
        }
    }
}

/// Header shared by every transaction of a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadHeader {
    pub service_token: String,
    pub service_id: String,
}

impl PayloadHeader {
    pub fn of(record: &ReportRecord) -> Self {
        Self {
            service_token: record.service_token.clone(),
            service_id: record.service_id.clone(),
        }
    }

    /// Check that `record` can be sent under this header.
    pub fn admits(&self, record: &ReportRecord) -> Result<(), RecordError> {
        record.validate()?;
        if record.service_id != self.service_id || record.service_token != self.service_token {
            return Err(RecordError::HeaderMismatch {
                expected: self.service_id.clone(),
                found: record.service_id.clone(),
            });
        }
        Ok(())
    }
}

/// A transport-ready batch of transactions from one bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPayload {
    endpoint: String,
    bucket: BucketKey,
    header: PayloadHeader,
    transactions: usize,
    body: String,
}

impl BatchPayload {
    /// Encode `records` under `header`.
    ///
    /// Records are expected to have been admitted by the header already.
    pub fn encode(
        endpoint: &str,
        bucket: BucketKey,
        header: PayloadHeader,
        auth_param: ServiceAuthParam,
        records: &[ReportRecord],
    ) -> Self {
        let mut form = form_urlencoded::Serializer::new(String::new());
        form.append_pair(SERVICE_ID, &header.service_id);
        form.append_pair(auth_param.as_str(), &header.service_token);
        for (index, record) in records.iter().enumerate() {
            record.encode_into(index, &mut form);
        }

        Self {
            endpoint: endpoint.to_string(),
            bucket,
            header,
            transactions: records.len(),
            body: form.finish(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn bucket(&self) -> &BucketKey {
        &self.bucket
    }

    pub fn header(&self) -> &PayloadHeader {
        &self.header
    }

    /// Number of transactions in the payload.
    pub fn len(&self) -> usize {
        self.transactions
    }

    pub fn is_empty(&self) -> bool {
        self.transactions == 0
    }

    /// The encoded request body.
    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn content_type(&self) -> &'static str {
        FORM_CONTENT_TYPE
    }
}
