use super::response;
use crate::{
    config::KisCredentials,
    http::client::{HttpClient, Method, RequestError},
    normalize::{RawPayload, RawRow, RawValue},
};
use serde_json::json;
use std::collections::HashMap;

const TOKEN_PATH: &str = "/oauth2/tokenP";
const DAILY_PRICE_PATH: &str = "/uapi/domestic-stock/v1/quotations/inquire-daily-price";
// transaction id of the daily price inquiry
const TR_DAILY_PRICE: &str = "FHKST01010400";

/// Upstream of daily bars.
#[allow(async_fn_in_trait)]
pub trait QuoteSource {
    async fn authenticate(&self) -> Result<String, RequestError>;

    /// Most recent daily bar, `None` when the upstream has no rows.
    async fn latest_bar(&self, code: &str, token: &str) -> Result<Option<RawRow>, RequestError>;
}

// Checks the result code returned from the API and returns an error if it is not "0".
fn check_status(resp: &response::DailyPrice) -> Result<(), RequestError> {
    match resp.rt_cd.as_str() {
        "0" => Ok(()),
        code => Err(RequestError::Api {
            code: resp.msg_cd.clone().unwrap_or_else(|| code.to_string()),
            message: resp.msg1.clone().unwrap_or_else(|| "Unknown error".into()),
        }),
    }
}

pub fn row_to_raw(code: &str, row: &response::DailyPriceRow) -> RawRow {
    RawRow {
        code: code.to_string(),
        date: RawValue::Text(row.stck_bsop_date.clone()),
        payload: RawPayload::Bar {
            open: RawValue::Text(row.stck_oprc.clone()),
            high: RawValue::Text(row.stck_hgpr.clone()),
            low: RawValue::Text(row.stck_lwpr.clone()),
            close: RawValue::Text(row.stck_clpr.clone()),
            volume: RawValue::Text(row.acml_vol.clone()),
        },
    }
}

/// Client for the Korea Investment & Securities REST API.
pub struct KisClient<'a> {
    http: &'a HttpClient,
    credentials: KisCredentials,
}

impl<'a> KisClient<'a> {
    pub fn new(http: &'a HttpClient, credentials: KisCredentials) -> Self {
        Self { http, credentials }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.credentials.base_url.trim_end_matches('/'), path)
    }
}

impl QuoteSource for KisClient<'_> {
    async fn authenticate(&self) -> Result<String, RequestError> {
        let body = json!({
            "grant_type": "client_credentials",
            "appkey": self.credentials.app_key,
            "appsecret": self.credentials.app_secret,
        });
        let body = serde_json::to_vec(&body).map_err(|e| RequestError::Other(e.to_string()))?;

        let token = self
            .http
            .request::<response::AccessToken>(
                Method::Post(Some(body)),
                &self.url(TOKEN_PATH),
                HashMap::new(),
                HashMap::new(),
                None,
            )
            .await?;
        log::debug!(
            "received {} token valid for {:?}s",
            token.token_type.as_deref().unwrap_or("access"),
            token.expires_in
        );
        Ok(token.access_token)
    }

    async fn latest_bar(&self, code: &str, token: &str) -> Result<Option<RawRow>, RequestError> {
        let resp = self
            .http
            .request::<response::DailyPrice>(
                Method::Get,
                &self.url(DAILY_PRICE_PATH),
                HashMap::from([
                    ("FID_COND_MRKT_DIV_CODE", "J"),
                    ("FID_INPUT_ISCD", code),
                    ("FID_PERIOD_DIV_CODE", "D"),
                    ("FID_ORG_ADJ_PRC", "1"),
                ]),
                HashMap::from([
                    ("appkey", self.credentials.app_key.as_str()),
                    ("appsecret", self.credentials.app_secret.as_str()),
                    ("tr_id", TR_DAILY_PRICE),
                    ("custtype", "P"),
                ]),
                Some(token),
            )
            .await?;
        check_status(&resp)?;

        // rows come newest first
        Ok(resp.output.first().map(|row| row_to_raw(code, row)))
    }
}
