//! Browser-facing HTTP surface.
//!
//! A deliberately small HTTP/1.1 server on plain tokio sockets:
//! `GET /` serves a form, `/go` (GET or POST) runs one transfer and
//! answers with the result inlined as a base64 data URL. Content and
//! style inputs are server-local paths or `http(s)` URLs; remote
//! references are fetched into memory before the transfer starts.
//! Transfers are serialized behind one stylizer; concurrent requests
//! queue.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use burn::tensor::backend::AutodiffBackend;
use image::{ImageFormat, RgbImage};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::error::{StyleError, StyleResult};
use crate::io::{fit_within, load_image, to_image, to_tensor};
use crate::stylize::Stylizer;

/// Server knobs. The ratio default matches the form's prefill.
#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub addr: String,
    pub default_ratio: f64,
}

impl Default for ServeConfig {
    fn default() -> Self {
        ServeConfig {
            addr: "0.0.0.0:8000".into(),
            default_ratio: 10.0,
        }
    }
}

/// One parsed `/go` request.
#[derive(Debug, PartialEq)]
struct GoRequest {
    content: String,
    style: String,
    size: u32,
    ratio: f64,
}

struct Shared<B: AutodiffBackend> {
    stylizer: Mutex<Stylizer<B>>,
    config: ServeConfig,
}

/// Bind the configured address and serve until the process dies.
pub async fn serve<B>(stylizer: Stylizer<B>, config: ServeConfig) -> StyleResult<()>
where
    B: AutodiffBackend,
    Stylizer<B>: Send + 'static,
{
    let listener = TcpListener::bind(&config.addr).await?;
    eprintln!("listening on http://{}", config.addr);
    serve_with(listener, stylizer, config).await
}

/// Accept loop over an already-bound listener.
pub async fn serve_with<B>(
    listener: TcpListener,
    stylizer: Stylizer<B>,
    config: ServeConfig,
) -> StyleResult<()>
where
    B: AutodiffBackend,
    Stylizer<B>: Send + 'static,
{
    let shared = Arc::new(Shared {
        stylizer: Mutex::new(stylizer),
        config,
    });

    loop {
        let (stream, _) = listener.accept().await?;
        let shared = Arc::clone(&shared);
        tokio::spawn(async move {
            if let Err(e) = handle_conn(stream, shared).await {
                eprintln!("serve: connection error: {e}");
            }
        });
    }
}

async fn handle_conn<B>(mut stream: TcpStream, shared: Arc<Shared<B>>) -> StyleResult<()>
where
    B: AutodiffBackend,
    Stylizer<B>: Send + 'static,
{
    let head = read_head(&mut stream).await?;
    let request_line = head.lines().next().unwrap_or("");
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let target = parts.next().unwrap_or("");

    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p, q),
        None => (target, ""),
    };

    match (method, path) {
        ("GET", "/") => respond(&mut stream, "200 OK", "text/html", INDEX_HTML).await,
        // Parameters ride the query string for POST too.
        ("GET", "/go") | ("POST", "/go") => {
            let params = parse_query(query);
            let request = match parse_go(&params, shared.config.default_ratio) {
                Ok(r) => r,
                Err(msg) => {
                    return respond(
                        &mut stream,
                        "400 Bad Request",
                        "text/plain",
                        &format!("{msg}\n"),
                    )
                    .await;
                }
            };

            let (content, style) = match fetch_inputs(&request).await {
                Ok(pair) => pair,
                Err(e) => {
                    eprintln!("serve: input fetch failed: {e}");
                    return respond(
                        &mut stream,
                        "500 Internal Server Error",
                        "text/plain",
                        &format!("{e}\n"),
                    )
                    .await;
                }
            };

            let worker = Arc::clone(&shared);
            let outcome =
                tokio::task::spawn_blocking(move || run_transfer(&worker, request, content, style))
                    .await
                    .map_err(|e| StyleError::Internal(format!("transfer task failed: {e}")))?;

            match outcome {
                Ok(html) => respond(&mut stream, "200 OK", "text/html", &html).await,
                Err(e) => {
                    eprintln!("serve: transfer failed: {e}");
                    respond(
                        &mut stream,
                        "500 Internal Server Error",
                        "text/plain",
                        &format!("{e}\n"),
                    )
                    .await
                }
            }
        }
        (_, "/") | (_, "/go") => {
            respond(
                &mut stream,
                "405 Method Not Allowed",
                "text/plain",
                "method not allowed\n",
            )
            .await
        }
        _ => respond(&mut stream, "404 Not Found", "text/plain", "not found\n").await,
    }
}

/// Resolve both input references into decoded images.
async fn fetch_inputs(request: &GoRequest) -> StyleResult<(RgbImage, RgbImage)> {
    Ok((
        fetch_image(&request.content).await?,
        fetch_image(&request.style).await?,
    ))
}

/// Read one input: `http(s)://` fetches over the network, anything
/// else is a server-local path.
async fn fetch_image(input: &str) -> StyleResult<RgbImage> {
    if input.starts_with("http://") || input.starts_with("https://") {
        let response = reqwest::get(input).await?.error_for_status()?;
        let bytes = response.bytes().await?;
        Ok(image::load_from_memory(&bytes)?.into_rgb8())
    } else {
        load_image(Path::new(input))
    }
}

/// Shrink, transfer, and package the result as an `<img>` tag.
/// Runs on a blocking thread; the stylizer lock serializes runs.
fn run_transfer<B>(
    shared: &Shared<B>,
    request: GoRequest,
    content: RgbImage,
    style: RgbImage,
) -> StyleResult<String>
where
    B: AutodiffBackend,
{
    let mut stylizer = shared.stylizer.blocking_lock();
    let device = stylizer.device();

    let content = fit_within(&content, request.size);
    let style = fit_within(&style, request.size);

    let content_t = to_tensor::<B>(&content, &device);
    let style_t = to_tensor::<B>(&style, &device);
    let (result, report) = stylizer.run(content_t, style_t, request.ratio)?;

    eprintln!(
        "serve: {} + {} at {} (ratio {}): loss {:.5} -> {:.5}",
        request.content,
        request.style,
        request.size,
        request.ratio,
        report.initial_loss().unwrap_or(f32::NAN),
        report.final_loss
    );

    let img = to_image(result)?;
    Ok(format!("<img src=\"{}\" />", data_url(&img)?))
}

/// JPEG-encode and wrap as a `data:` URL.
fn data_url(img: &RgbImage) -> StyleResult<String> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)?;
    Ok(format!(
        "data:image/jpg;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    ))
}

async fn read_head(stream: &mut TcpStream) -> StyleResult<String> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.len() > 16 * 1024 {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

async fn respond(
    stream: &mut TcpStream,
    status: &str,
    content_type: &str,
    body: &str,
) -> StyleResult<()> {
    let head = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

fn parse_go(params: &[(String, String)], default_ratio: f64) -> Result<GoRequest, String> {
    let content = param(params, "content").ok_or("missing 'content' parameter")?;
    let style = param(params, "style").ok_or("missing 'style' parameter")?;

    let size = param(params, "size").ok_or("missing 'size' parameter")?;
    let size: u32 = size.parse().map_err(|_| format!("bad size '{size}'"))?;

    let ratio = match param(params, "ratio") {
        Some(r) if !r.is_empty() => r.parse().map_err(|_| format!("bad ratio '{r}'"))?,
        _ => default_ratio,
    };

    Ok(GoRequest {
        content: content.to_string(),
        style: style.to_string(),
        size,
        ratio,
    })
}

fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (percent_decode(k), percent_decode(v)),
            None => (percent_decode(pair), String::new()),
        })
        .collect()
}

fn percent_decode(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                match (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi * 16 + lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

const INDEX_HTML: &str = r#"<!doctype html>
<html>
  <body>
    <h1>Impasto</h1>
    <form action="/go" method="GET">
      <input type="text" name="content" placeholder="content path or URL" required/>
      <input type="text" name="style" placeholder="style path or URL" required/>
      <input type="number" name="ratio" placeholder="loss ratio" value="10"/>
      <select name="size">
        <option value="128">128</option>
        <option value="256">256</option>
        <option value="512">512</option>
        <option value="720">720</option>
        <option value="1024">1024</option>
      </select>
      <input type="submit"/>
    </form>
  </body>
</html>
"#;
