//! HTML pages shown to the end user's browser.
//!
//! All interpolated values are HTML-escaped.

const STYLE: &str = r#"body { font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif; background: #f5f5f5; margin: 0; display: flex; justify-content: center; align-items: center; min-height: 100vh; }
.card { background: #fff; border-radius: 8px; box-shadow: 0 2px 8px rgba(0,0,0,0.1); padding: 32px; max-width: 480px; width: 100%; }
h1 { font-size: 20px; margin: 0 0 8px; color: #333; }
p { color: #666; font-size: 14px; }
.error { background: #fee; border: 1px solid #c00; color: #c00; padding: 10px; border-radius: 4px; }
code { display: block; background: #f0f0f0; padding: 12px; border-radius: 4px; font-size: 13px; word-break: break-all; user-select: all; }"#;

/// Page shown when the login round trip cannot be completed.
pub fn render_error_page(error: &str, description: Option<&str>) -> String {
    let description_html = description
        .map(|d| format!("<p>{}</p>", html_escape(d)))
        .unwrap_or_default();

    page(
        "Authorization failed",
        &format!(
            r#"<h1>Authorization failed</h1>
<div class="error">{error}</div>
{description_html}
<p>Return to your application and start the sign-in again.</p>"#,
            error = html_escape(error),
        ),
    )
}

/// Page showing an authorization code for out-of-band clients.
pub fn render_success_page(code: &str, state: Option<&str>) -> String {
    let state_html = state
        .map(|s| format!("<p>State</p>\n<code>{}</code>", html_escape(s)))
        .unwrap_or_default();

    page(
        "Authorization complete",
        &format!(
            r#"<h1>Authorization complete</h1>
<p>Copy this code into your application:</p>
<code>{code}</code>
{state_html}"#,
            code = html_escape(code),
        ),
    )
}

fn page(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width,initial-scale=1">
<title>{title} - MCP OAuth Gateway</title>
<style>
{STYLE}
</style>
</head>
<body>
<div class="card">
{body}
</div>
</body>
</html>"#
    )
}

/// Escape HTML special characters.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
