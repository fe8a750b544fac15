use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::api;
use crate::appliance::Appliance;
use crate::error::{Error, Result};
use crate::session::Session;
use crate::types::ApplianceDetails;

/// All appliances paired with the account, keyed by haId.
pub struct ApplianceRegistry {
    session: Arc<Session>,
    appliances: RwLock<HashMap<String, Appliance>>,
    fetch_lock: Mutex<()>,
}

impl ApplianceRegistry {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            appliances: RwLock::new(HashMap::new()),
            fetch_lock: Mutex::new(()),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Return the appliances, fetching the list when `force` is set or
    /// nothing is cached yet.
    ///
    /// A fetch replaces every cached [`Appliance`]; event streams of the
    /// replaced instances are closed and have to be registered again on the
    /// new ones.
    pub async fn list(&self, force: bool) -> Result<HashMap<String, Appliance>> {
        if !force {
            let appliances = self.appliances.read().await;
            if !appliances.is_empty() {
                return Ok(appliances.clone());
            }
        }

        let _guard = self.fetch_lock.lock().await;
        if !force {
            // Filled by a concurrent caller while we waited
            let appliances = self.appliances.read().await;
            if !appliances.is_empty() {
                return Ok(appliances.clone());
            }
        }

        debug!("Fetching appliance list");
        let raw = self
            .session
            .authenticated_request(api::APPLIANCES, &[], None)
            .await?;
        let fresh = self.parse_list(&raw)?;
        info!("Found {} appliance(s)", fresh.len());

        let replaced = std::mem::replace(&mut *self.appliances.write().await, fresh.clone());
        for appliance in replaced.values() {
            appliance.unregister_events().await;
        }

        Ok(fresh)
    }

    /// Look up one appliance, refreshing the list once on a cache miss.
    pub async fn get(&self, id: &str) -> Result<Appliance> {
        if let Some(appliance) = self.appliances.read().await.get(id) {
            return Ok(appliance.clone());
        }

        debug!("Appliance {} not cached, refreshing list", id);
        self.list(true)
            .await?
            .remove(id)
            .ok_or_else(|| Error::UnknownAppliance(id.to_string()))
    }

    fn parse_list(&self, raw: &str) -> Result<HashMap<String, Appliance>> {
        let mut payload: Value = serde_json::from_str(raw)?;
        let Some(Value::Array(items)) = payload
            .pointer_mut("/data/homeappliances")
            .map(Value::take)
        else {
            return Err(Error::InvalidResponseFormat(
                "appliance list without data.homeappliances".to_string(),
            ));
        };

        let mut appliances = HashMap::with_capacity(items.len());
        for item in items {
            let Value::Object(mut fields) = item else {
                return Err(Error::InvalidResponseFormat(
                    "appliance entry is not an object".to_string(),
                ));
            };
            let Some(Value::String(id)) = fields.remove("haId") else {
                return Err(Error::InvalidResponseFormat(
                    "appliance entry without haId".to_string(),
                ));
            };
            let details: ApplianceDetails = serde_json::from_value(Value::Object(fields))?;
            let appliance = Appliance::new(self.session.clone(), id.clone(), Some(details));
            appliances.insert(id, appliance);
        }
        Ok(appliances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;

    fn registry() -> ApplianceRegistry {
        let session = Session::new(SessionConfig::new("client").with_base_url("http://127.0.0.1:9")).unwrap();
        ApplianceRegistry::new(Arc::new(session))
    }

    #[test]
    fn test_parse_list() {
        let raw = r#"{"data":{"homeappliances":[
            {"haId":"BOSCH-HCS06COM1-1","name":"Coffee","brand":"BOSCH","vib":"HCS06COM1","connected":true,"type":"CoffeeMaker","enumber":"HCS06COM1/01"},
            {"haId":"SIEMENS-HCS02DWH1-2","name":"Dishwasher","brand":"SIEMENS","vib":"HCS02DWH1","connected":false,"type":"Dishwasher","enumber":"HCS02DWH1/03"}
        ]}}"#;
        let appliances = registry().parse_list(raw).unwrap();
        assert_eq!(appliances.len(), 2);
        assert_eq!(appliances["BOSCH-HCS06COM1-1"].id(), "BOSCH-HCS06COM1-1");
    }

    #[tokio::test]
    async fn test_parsed_details_drop_ha_id() {
        let raw = r#"{"data":{"homeappliances":[{"haId":"X","name":"Oven","connected":true,"type":"Oven"}]}}"#;
        let appliances = registry().parse_list(raw).unwrap();
        let details = appliances["X"].details().await.unwrap();
        assert_eq!(details.name.as_deref(), Some("Oven"));
        assert!(details.extra.get("haId").is_none());
    }

    #[test]
    fn test_missing_envelope_is_rejected() {
        for raw in [r#"{"homeappliances":[]}"#, r#"{"data":{}}"#, r#"{"data":{"homeappliances":{}}}"#] {
            assert!(matches!(
                registry().parse_list(raw),
                Err(Error::InvalidResponseFormat(_))
            ));
        }
    }

    #[test]
    fn test_entry_without_id_is_rejected() {
        let raw = r#"{"data":{"homeappliances":[{"name":"Nameless"}]}}"#;
        assert!(matches!(
            registry().parse_list(raw),
            Err(Error::InvalidResponseFormat(_))
        ));
    }

    #[tokio::test]
    async fn test_list_without_token() {
        assert!(matches!(registry().list(false).await, Err(Error::NoToken)));
    }
}
