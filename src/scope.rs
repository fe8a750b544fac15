use crate::error::{Error, Result};

/// Scopes that can be requested on their own.
const FLAT_SCOPES: &[&str] = &["IdentifyAppliance", "Monitor", "Control", "Images", "Settings"];

/// Appliance types and the sub-scopes they accept as `Type-SubScope`.
/// A type name on its own is also a valid scope.
const TYPED_SCOPES: &[(&str, &[&str])] = &[
    ("*", &["Monitor", "Control", "Images", "Settings"]),
    ("Oven", &["Monitor", "Control", "Settings"]),
    ("Dishwasher", &["Monitor", "Control", "Settings"]),
    ("Washer", &["Monitor", "Control", "Settings"]),
    ("Dryer", &["Monitor", "Control", "Settings"]),
    ("FridgeFreezer", &["Monitor", "Images", "Settings"]),
    ("CoffeeMaker", &["Monitor", "Control", "Settings"]),
];

fn sub_scopes(appliance_type: &str) -> Option<&'static [&'static str]> {
    TYPED_SCOPES
        .iter()
        .find(|(name, _)| *name == appliance_type)
        .map(|(_, subs)| *subs)
}

fn is_known(token: &str) -> bool {
    if FLAT_SCOPES.contains(&token) || sub_scopes(token).is_some() {
        return true;
    }
    match token.split_once('-') {
        Some((appliance_type, sub)) => {
            sub_scopes(appliance_type).is_some_and(|subs| subs.contains(&sub))
        }
        None => false,
    }
}

/// Check every whitespace-separated token of `scope` against the scope table.
///
/// Returns the scope unchanged, or [`Error::UnknownScope`] naming the first
/// token that is not recognized.
pub fn validate(scope: &str) -> Result<String> {
    let mut tokens = scope.split_whitespace().peekable();
    if tokens.peek().is_none() {
        return Err(Error::UnknownScope(scope.to_string()));
    }
    for token in tokens {
        if !is_known(token) {
            return Err(Error::UnknownScope(token.to_string()));
        }
    }
    Ok(scope.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_scopes_returned_unchanged() {
        for scope in [
            "IdentifyAppliance Monitor",
            "IdentifyAppliance Monitor *-Control Settings",
            "Oven-Monitor Dishwasher-Control FridgeFreezer-Images",
            "CoffeeMaker",
        ] {
            assert_eq!(validate(scope).unwrap(), scope);
        }
    }

    #[test]
    fn test_unknown_flat_scope() {
        match validate("Monitor Bogus Control") {
            Err(Error::UnknownScope(token)) => assert_eq!(token, "Bogus"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_sub_scope() {
        match validate("Oven-Unknown") {
            Err(Error::UnknownScope(token)) => assert_eq!(token, "Oven-Unknown"),
            other => panic!("unexpected result: {other:?}"),
        }
        // Washers have no images
        assert!(validate("Washer-Images").is_err());
        // Flat scopes take no sub-scope
        assert!(validate("Monitor-Control").is_err());
    }

    #[test]
    fn test_first_failure_is_reported() {
        match validate("Nope Bogus") {
            Err(Error::UnknownScope(token)) => assert_eq!(token, "Nope"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_empty_scope_rejected() {
        assert!(matches!(validate(""), Err(Error::UnknownScope(_))));
        assert!(matches!(validate("   "), Err(Error::UnknownScope(_))));
    }
}
