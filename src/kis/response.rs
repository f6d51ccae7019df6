use serde::Deserialize;

#[derive(Deserialize, Debug)]
pub struct AccessToken {
    pub access_token: String,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
}

/// Daily price inquiry. Numbers arrive as strings.
#[derive(Deserialize, Debug)]
pub struct DailyPrice {
    pub rt_cd: String,
    pub msg_cd: Option<String>,
    pub msg1: Option<String>,
    #[serde(default)]
    pub output: Vec<DailyPriceRow>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DailyPriceRow {
    /// Business date, `YYYYMMDD`.
    pub stck_bsop_date: String,
    pub stck_oprc: String,
    pub stck_hgpr: String,
    pub stck_lwpr: String,
    pub stck_clpr: String,
    pub acml_vol: String,
}
