use super::{StepContext, StepOutcome};

pub async fn run(method: &str, url: &str, body: Option<&str>, expect_status: Option<u16>, ctx: &StepContext) -> StepOutcome {
    let method = match reqwest::Method::from_bytes(method.to_uppercase().as_bytes()) {
        Ok(method) => method,
        Err(err) => return StepOutcome::failure(format!("invalid HTTP method {method}: {err}"), None),
    };

    let mut request = ctx.http.request(method, url);
    if let Some(body) = body {
        request = request.body(body.to_string());
    }

    match request.send().await {
        Ok(response) => {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let wanted = expect_status.map_or_else(|| status.is_success(), |want| status.as_u16() == want);
            if wanted {
                StepOutcome::success(body)
            } else {
                StepOutcome::failure(format!("unexpected status {status}: {body}"), Some(i32::from(status.as_u16())))
            }
        }
        Err(err) => StepOutcome::failure(format!("http request failed: {err}"), None),
    }
}
