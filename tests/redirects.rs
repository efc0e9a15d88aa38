//! Redirect following and cookie accumulation over real HTTP.

use std::sync::Arc;

use powscraper_rs::{
    CookieJar, RedirectingFetcher, ReqwestChallengeHttpClient, UserAgentOptions,
    get_user_agent_profile,
};
use url::Url;
use wiremock::matchers::{header, method, path, path_regex};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn fetcher() -> RedirectingFetcher {
    let client = ReqwestChallengeHttpClient::new().expect("client");
    let profile = get_user_agent_profile(UserAgentOptions::default()).expect("profile");
    RedirectingFetcher::new(Arc::new(client), profile)
}

#[tokio::test]
async fn accumulates_cookies_over_three_hops() {
    let server = MockServer::start().await;

    for (from, to, cookie) in [("/a", "/b", "a=1"), ("/b", "/c", "b=2"), ("/c", "/d", "c=3")] {
        Mock::given(method("GET"))
            .and(path(from))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", to)
                    .insert_header("set-cookie", format!("{cookie}; Path=/").as_str()),
            )
            .expect(1)
            .mount(&server)
            .await;
    }

    Mock::given(method("GET"))
        .and(path("/d"))
        .and(header("cookie", "a=1; b=2; c=3"))
        .respond_with(ResponseTemplate::new(200).set_body_string("done"))
        .expect(1)
        .mount(&server)
        .await;

    let start = Url::parse(&format!("{}/a", server.uri())).unwrap();
    let ctx = fetcher()
        .fetch_following_redirects(start, CookieJar::new())
        .await
        .expect("fetch");

    assert_eq!(ctx.status(), 200);
    assert_eq!(ctx.current_url.path(), "/d");
    assert_eq!(ctx.body_text(), "done");
    assert_eq!(ctx.cookie_jar.to_header().as_deref(), Some("a=1; b=2; c=3"));
}

#[tokio::test]
async fn stops_after_three_redirects() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/loop/\d+$"))
        .respond_with(|request: &Request| {
            let hop: u32 = request
                .url
                .path()
                .trim_start_matches("/loop/")
                .parse()
                .unwrap_or(0);
            ResponseTemplate::new(302).insert_header("location", format!("/loop/{}", hop + 1).as_str())
        })
        .mount(&server)
        .await;

    let start = Url::parse(&format!("{}/loop/0", server.uri())).unwrap();
    let ctx = fetcher()
        .fetch_following_redirects(start, CookieJar::new())
        .await
        .expect("fetch");

    assert_eq!(ctx.status(), 302);
    assert_eq!(ctx.current_url.path(), "/loop/3");
    assert_eq!(server.received_requests().await.unwrap().len(), 4);
}

#[tokio::test]
async fn sends_browser_headers_with_origin_referer() {
    let server = MockServer::start().await;
    let origin = server.uri();

    Mock::given(method("GET"))
        .and(path("/page"))
        .and(header("referer", origin.as_str()))
        .and(header("sec-fetch-mode", "navigate"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let url = Url::parse(&format!("{origin}/page")).unwrap();
    let ctx = fetcher()
        .fetch_following_redirects(url, CookieJar::new())
        .await
        .expect("fetch");
    assert_eq!(ctx.body_text(), "ok");

    let requests = server.received_requests().await.unwrap();
    let user_agent = requests[0].headers.get("user-agent").expect("user-agent");
    assert!(user_agent.to_str().unwrap().starts_with("Mozilla/5.0"));
}
