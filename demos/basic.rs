use std::sync::Arc;

use curlkit_http::{CacheConfig, CacheStrategy, CurlClient, HttpRequest, RetryConfig};

fn main() -> anyhow::Result<()> {
    let base_url = std::env::var("CURLKIT_LIVE_URL")?;

    let client = CurlClient::reqwest()?;
    client.set_retry_config(RetryConfig {
        max_retries: 2,
        retry_delay_ms: 250,
        ..RetryConfig::default()
    });
    client.set_cache_config(CacheConfig::new(CacheStrategy::CacheFirst, 60));
    client.add_request_interceptor(Arc::new(
        |request: HttpRequest| -> curlkit_http::Result<HttpRequest> {
            Ok(request.with_header("X-Client", "curlkit-demo"))
        },
    ));

    let response = client.get(format!("{base_url}/get"))?;
    println!("{} in {} ms", response.status_code, response.response_time_ms);

    let cached = client.get(format!("{base_url}/get"))?;
    println!("cached: {}", cached == response);

    let posted = client.post_json(format!("{base_url}/post"), r#"{"code":"0000"}"#)?;
    println!("{}", posted.body);

    println!("{}", client.cache_stats());
    client.shutdown();
    Ok(())
}
