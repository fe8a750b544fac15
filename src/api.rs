//! Endpoint table for the Home Connect REST API.
//!
//! Templates are relative to `/api` and use `{name}` placeholders that
//! [`expand_url`] fills in.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Delete,
}

impl Method {
    pub fn as_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub method: Method,
    pub template: &'static str,
}

const fn get(template: &'static str) -> Endpoint {
    Endpoint {
        method: Method::Get,
        template,
    }
}

const fn put(template: &'static str) -> Endpoint {
    Endpoint {
        method: Method::Put,
        template,
    }
}

const fn delete(template: &'static str) -> Endpoint {
    Endpoint {
        method: Method::Delete,
        template,
    }
}

pub const API_PREFIX: &str = "/api";
pub const AUTHORIZE_PATH: &str = "/security/oauth/authorize";
pub const TOKEN_PATH: &str = "/security/oauth/token";

/// Vendor media type sent as `Accept` and `Content-Type` on resource calls.
pub const MEDIA_TYPE: &str = "application/vnd.bsh.sdk.v1+json";

pub const APPLIANCES: Endpoint = get("/homeappliances");
pub const APPLIANCE: Endpoint = get("/homeappliances/{haid}");

pub const IMAGES: Endpoint = get("/homeappliances/{haid}/images");
pub const IMAGE: Endpoint = get("/homeappliances/{haid}/images/{imagekey}");

pub const ACTIVE_PROGRAM: Endpoint = get("/homeappliances/{haid}/programs/active");
pub const START_PROGRAM: Endpoint = put("/homeappliances/{haid}/programs/active");
pub const STOP_PROGRAM: Endpoint = delete("/homeappliances/{haid}/programs/active");
pub const ACTIVE_OPTIONS: Endpoint = get("/homeappliances/{haid}/programs/active/options");
pub const SET_ACTIVE_OPTIONS: Endpoint = put("/homeappliances/{haid}/programs/active/options");
pub const ACTIVE_OPTION: Endpoint =
    get("/homeappliances/{haid}/programs/active/options/{optionkey}");
pub const SET_ACTIVE_OPTION: Endpoint =
    put("/homeappliances/{haid}/programs/active/options/{optionkey}");

pub const SELECTED_PROGRAM: Endpoint = get("/homeappliances/{haid}/programs/selected");
pub const SELECT_PROGRAM: Endpoint = put("/homeappliances/{haid}/programs/selected");
pub const SELECTED_OPTIONS: Endpoint = get("/homeappliances/{haid}/programs/selected/options");
pub const SET_SELECTED_OPTIONS: Endpoint =
    put("/homeappliances/{haid}/programs/selected/options");
pub const SELECTED_OPTION: Endpoint =
    get("/homeappliances/{haid}/programs/selected/options/{optionkey}");
pub const SET_SELECTED_OPTION: Endpoint =
    put("/homeappliances/{haid}/programs/selected/options/{optionkey}");

pub const AVAILABLE_PROGRAMS: Endpoint = get("/homeappliances/{haid}/programs/available");
pub const AVAILABLE_PROGRAM: Endpoint =
    get("/homeappliances/{haid}/programs/available/{programkey}");

pub const SETTINGS: Endpoint = get("/homeappliances/{haid}/settings");
pub const SETTING: Endpoint = get("/homeappliances/{haid}/settings/{settingskey}");
pub const SET_SETTING: Endpoint = put("/homeappliances/{haid}/settings/{settingskey}");

pub const STATUS: Endpoint = get("/homeappliances/{haid}/status");
pub const STATUS_ITEM: Endpoint = get("/homeappliances/{haid}/status/{statuskey}");

pub const EVENTS: Endpoint = get("/homeappliances/{haid}/events");

/// Expand `{name}` placeholders in `template` and prefix it with `/api`.
///
/// Placeholders without a matching parameter are left as they are.
pub fn expand_url(template: &str, params: &[(&str, &str)]) -> String {
    let mut url = format!("{}{}", API_PREFIX, template);
    for (name, value) in params {
        url = url.replace(&format!("{{{}}}", name), value);
    }
    url
}
