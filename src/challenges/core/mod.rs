//! Core utilities shared by the detector, solver, and resolver.

pub mod analysis;
pub mod cookies;
pub mod error;
pub mod executor;
pub mod reqwest_client;
pub mod timing;
pub mod types;

pub use analysis::{TagAttributes, extract_tags, origin_from_url, parse_attributes, with_origin};
pub use cookies::CookieJar;
pub use error::{FetchError, FetchErrorKind};
pub use executor::{
    ChallengeHttpClient, ChallengeHttpClientError, ChallengeHttpRequest, ChallengeHttpResponse,
    RedirectingFetcher,
};
pub use reqwest_client::ReqwestChallengeHttpClient;
pub use timing::RequestPacer;
pub use types::{Challenge, ChallengeSubmission, FetchContext, ResolvedPage};
