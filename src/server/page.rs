// HTML front page
//
// One form to submit a message, then one card per candidate with a rating
// form (POST /rate) and a "best option" button that posts to /choose.

use crate::feedback::RatingScale;

/// Settings the page needs from the server config
#[derive(Debug, Clone, Copy)]
pub struct PageOptions<'a> {
    /// Value sent as `chosen` by the "Cannot be rewritten" button
    pub marker: &'a str,
    pub scale: RatingScale,
}

/// Escape text for use in element content and quoted attributes.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

const HEAD: &str = r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Detoxifier</title>
<style>
body { font-family: sans-serif; max-width: 46rem; margin: 2rem auto; padding: 0 1rem; }
textarea { width: 100%; min-height: 5rem; }
.option { border: 1px solid #ccc; border-radius: 6px; padding: 0.75rem; margin: 0.75rem 0; }
.error { color: #b00020; }
#status { margin-top: 1rem; }
</style>
</head>
<body>
<h1>Detoxifier</h1>
"#;

const SCRIPT: &str = r#"<script>
async function post(url, body) {
  const res = await fetch(url, {
    method: "POST",
    headers: { "Content-Type": "application/json" },
    body: JSON.stringify(body),
  });
  const data = await res.json();
  document.getElementById("status").textContent = data.message || data.error;
}
function choose(button) {
  const options = Array.from(document.querySelectorAll(".option")).map(o => o.dataset.text);
  post("/choose", { toxic: button.dataset.toxic, chosen: button.dataset.text, options });
}
function untoxifiable(button) {
  const options = Array.from(document.querySelectorAll(".option")).map(o => o.dataset.text);
  post("/choose", { toxic: button.dataset.toxic, chosen: button.dataset.marker, options });
}
function retrain() {
  document.getElementById("status").textContent = "Retraining...";
  post("/retrain", {});
}
</script>
"#;

/// Render the page, optionally with candidates for `message`.
pub fn render(message: &str, candidates: &[String], options: &PageOptions<'_>, error: Option<&str>) -> String {
    let message_html = escape_html(message);
    let mut html = String::from(HEAD);

    html.push_str(&format!(
        r#"<form method="post" action="/">
<textarea name="message" placeholder="Type a message to rewrite">{}</textarea>
<button type="submit">Detoxify</button>
</form>
"#,
        message_html
    ));

    if let Some(error) = error {
        html.push_str(&format!("<p class=\"error\">{}</p>\n", escape_html(error)));
    }

    if !candidates.is_empty() {
        html.push_str("<h2>Options</h2>\n");
        let ratings = rating_options(&options.scale);
        for candidate in candidates {
            let text = escape_html(candidate);
            html.push_str(&format!(
                r#"<div class="option" data-text="{text}">
<p>{text}</p>
<form method="post" action="/rate">
<input type="hidden" name="message" value="{message}">
<input type="hidden" name="response" value="{text}">
<select name="rating">
{ratings}
</select>
<button type="submit">Rate</button>
</form>
<button type="button" data-toxic="{message}" data-text="{text}" onclick="choose(this)">Best option</button>
</div>
"#,
                text = text,
                message = message_html,
                ratings = ratings
            ));
        }
        html.push_str(&format!(
            "<button type=\"button\" data-toxic=\"{}\" data-marker=\"{}\" onclick=\"untoxifiable(this)\">Cannot be rewritten</button>\n",
            message_html,
            escape_html(options.marker)
        ));
    }

    html.push_str("<p><button type=\"button\" onclick=\"retrain()\">Retrain model</button></p>\n");
    html.push_str("<p id=\"status\"></p>\n");
    html.push_str(SCRIPT);
    html.push_str("</body>\n</html>\n");
    html
}

/// `<option>` elements from floor to ceiling with the midpoint preselected
fn rating_options(scale: &RatingScale) -> String {
    let middle = scale.floor + scale.ceiling.saturating_sub(scale.floor) / 2;
    (scale.floor..=scale.ceiling)
        .map(|rating| {
            if rating == middle {
                format!("<option selected>{}</option>", rating)
            } else {
                format!("<option>{}</option>", rating)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPTIONS: PageOptions<'static> = PageOptions {
        marker: "UNTOXIFIABLE",
        scale: RatingScale { floor: 1, ceiling: 5 },
    };

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<b>"you" & 'me'</b>"#),
            "&lt;b&gt;&quot;you&quot; &amp; &#39;me&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn test_render_escapes_candidates() {
        let html = render("<script>", &["a < b".to_string()], &OPTIONS, None);
        assert!(!html.contains("<textarea name=\"message\" placeholder=\"Type a message to rewrite\"><script>"));
        assert!(html.contains("a &lt; b"));
        assert!(html.contains("data-marker=\"UNTOXIFIABLE\""));
    }

    #[test]
    fn test_render_without_candidates() {
        let html = render("", &[], &OPTIONS, Some("Please enter a message"));
        assert!(!html.contains("<h2>Options</h2>"));
        assert!(html.contains("Please enter a message"));
    }

    #[test]
    fn test_rating_select_follows_scale() {
        let options = PageOptions {
            scale: RatingScale { floor: 0, ceiling: 10 },
            ..OPTIONS
        };
        let html = render("you are bad", &["you are nice".to_string()], &options, None);

        assert_eq!(html.matches("<option").count(), 11);
        assert!(html.contains("<option>0</option>"));
        assert!(html.contains("<option selected>5</option>"));
        assert!(html.contains("<option>10</option>"));

        let html = render("you are bad", &["you are nice".to_string()], &OPTIONS, None);
        assert_eq!(html.matches("<option").count(), 5);
        assert!(html.contains("<option selected>3</option>"));
    }
}
