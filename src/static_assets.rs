use anyhow::Result;
use axum::response::Html;
use axum::routing::{get, get_service};
use axum::Router;
use std::path::PathBuf;
use tower_http::services::{ServeDir, ServeFile};

const LOGIN_HELPER: &str = r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Tado Bridge</title>
  </head>
  <body style="font-family: system-ui; padding: 24px; max-width: 40rem">
    <h1>Tado Bridge</h1>
    <p>Link your tado account so polling can start.</p>
    <button id="start">Start login</button>
    <div id="instructions" hidden>
      <p>
        Open <a id="verify-link" target="_blank" rel="noopener"></a> and enter
        code <strong id="user-code"></strong>.
      </p>
      <p id="status">Waiting for approval&hellip;</p>
    </div>
    <script>
      const start = document.getElementById('start');
      start.addEventListener('click', async () => {
        start.disabled = true;
        const res = await fetch('/api/login/start', { method: 'POST' });
        const auth = await res.json();
        if (!res.ok) {
          document.getElementById('status').textContent = auth.error || 'Login failed';
          start.disabled = false;
          return;
        }
        const link = document.getElementById('verify-link');
        link.href = auth.verification_uri_complete || auth.verification_uri;
        link.textContent = auth.verification_uri;
        document.getElementById('user-code').textContent = auth.user_code;
        document.getElementById('instructions').hidden = false;

        const intervalMs = (auth.interval || 5) * 1000;
        const timer = setInterval(async () => {
          const poll = await fetch('/api/login/poll?code=' + encodeURIComponent(auth.device_code));
          const body = await poll.json();
          if (body.access_token) {
            clearInterval(timer);
            document.getElementById('status').textContent = 'Logged in. Polling will start shortly.';
          } else if (body.error && body.error !== 'authorization_pending') {
            clearInterval(timer);
            document.getElementById('status').textContent = 'Login failed: ' + body.error;
            start.disabled = false;
          }
        }, intervalMs);
      });
    </script>
  </body>
</html>
"#;

/// Fallback service: a configured static root when present, otherwise the
/// embedded login helper page.
pub fn service(static_root: Option<PathBuf>) -> Result<Router> {
    let router = if let Some(root) = static_root {
        if !root.exists() {
            anyhow::bail!("static root not found at {}", root.display());
        }
        let index = root.join("index.html");
        let dir = ServeDir::new(root)
            .append_index_html_on_directories(true)
            .not_found_service(ServeFile::new(index));
        Router::new().fallback_service(get_service(dir))
    } else {
        async fn login_helper() -> Html<&'static str> {
            Html(LOGIN_HELPER)
        }

        Router::new()
            .route("/", get(login_helper))
            .fallback(get(login_helper))
    };
    Ok(router)
}
