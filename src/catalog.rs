//! HTTP status codes returned by the Home Connect API and what they mean.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    pub code: u16,
    pub name: &'static str,
    pub description: &'static str,
}

const UNKNOWN: &str = "Unknown";

const ENTRIES: &[CatalogEntry] = &[
    CatalogEntry {
        code: 200,
        name: "OK",
        description: "The request was successful. Typically returned for successful GET requests.",
    },
    CatalogEntry {
        code: 204,
        name: "No Content",
        description: "The request was successful. Typically returned for successful PUT/DELETE requests with no payload.",
    },
    CatalogEntry {
        code: 400,
        name: "Bad Request",
        description: "Error occurred (e.g. validation error - value is out of range)",
    },
    CatalogEntry {
        code: 401,
        name: "Unauthorized",
        description: "No or invalid access token",
    },
    CatalogEntry {
        code: 403,
        name: "Forbidden",
        description: "Scope has not been granted or home appliance is not assigned to HC account",
    },
    CatalogEntry {
        code: 404,
        name: "Not Found",
        description: "This resource is not available (e.g. no images on washing machine)",
    },
    CatalogEntry {
        code: 405,
        name: "Method not allowed",
        description: "The HTTP Method is not allowed for this resource",
    },
    CatalogEntry {
        code: 406,
        name: "Not Acceptable",
        description: "The resource identified by the request is only capable of generating response entities which have content characteristics not acceptable according to the accept headers sent in the request.",
    },
    CatalogEntry {
        code: 408,
        name: "Request Timeout",
        description: "API Server failed to produce an answer or has no connection to backend service",
    },
    CatalogEntry {
        code: 409,
        name: "Conflict",
        description: "Command/Query cannot be executed for the home appliance, the error response contains the error details",
    },
    CatalogEntry {
        code: 415,
        name: "Unsupported Media Type",
        description: "The request's Content-Type is not supported",
    },
    CatalogEntry {
        code: 429,
        name: "Too Many Requests",
        description: "E.g. the number of requests for a specific endpoint exceeded the quota of the client",
    },
    CatalogEntry {
        code: 500,
        name: "Internal Server Error",
        description: "E.g. in case of a server configuration error or any errors in resource files",
    },
    CatalogEntry {
        code: 503,
        name: "Service Unavailable",
        description: "E.g. if a required backend service is not available",
    },
];

/// Look up a status code. Codes outside the catalog map to an
/// `"Unknown"` entry carrying the original code.
pub fn lookup(code: u16) -> CatalogEntry {
    ENTRIES
        .iter()
        .find(|entry| entry.code == code)
        .copied()
        .unwrap_or(CatalogEntry {
            code,
            name: UNKNOWN,
            description: UNKNOWN,
        })
}
