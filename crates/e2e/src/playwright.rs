//! Playwright browser automation
//!
//! A single Node.js driver process owns the browser. Rust talks to it over a
//! JSON-lines protocol on stdin/stdout: every request carries an `id`, every
//! reply echoes it, so any number of requests can be in flight at once.

use std::collections::HashMap;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command as TokioCommand};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::BrowserConfig;
use crate::engine::{ApiRequest, ApiResponse, BrowserEngine, ContextId, Cookie, Navigation, PageId};
use crate::error::{E2eError, E2eResult};

/// Environment variable carrying the launch options to the driver
const DRIVER_ENV: &str = "THUNDERDOME_E2E_DRIVER";

const DRIVER_SCRIPT: &str = r#"
const playwright = require('playwright');
const readline = require('readline');

const launch = JSON.parse(process.env.THUNDERDOME_E2E_DRIVER);
const contexts = new Map();
const pages = new Map();
let nextHandle = 1;

function send(message) {
  process.stdout.write(JSON.stringify(message) + '\n');
}

function lookup(map, kind, id) {
  const value = map.get(id);
  if (!value) {
    throw new Error(`unknown ${kind} ${id}`);
  }
  return value;
}

(async () => {
  const browser = await playwright[launch.browser].launch({ headless: launch.headless });

  const handlers = {
    async newContext() {
      const ctx = await browser.newContext({ baseURL: launch.baseUrl, viewport: launch.viewport });
      const id = nextHandle++;
      contexts.set(id, ctx);
      return { context: id };
    },
    async closeContext(req) {
      const ctx = contexts.get(req.context);
      if (ctx) {
        contexts.delete(req.context);
        for (const [id, page] of pages) {
          if (page.context() === ctx) {
            pages.delete(id);
          }
        }
        await ctx.close();
      }
      return {};
    },
    async clearCookies(req) {
      await lookup(contexts, 'context', req.context).clearCookies();
      return {};
    },
    async cookies(req) {
      const cookies = await lookup(contexts, 'context', req.context).cookies();
      return {
        cookies: cookies.map((c) => ({ name: c.name, value: c.value, domain: c.domain, path: c.path })),
      };
    },
    async request(req) {
      const response = await lookup(contexts, 'context', req.context).request.fetch(req.path, {
        method: req.method,
        data: req.body,
        timeout: req.timeout_ms,
        failOnStatusCode: false,
      });
      let body = null;
      try {
        body = await response.json();
      } catch (_) {
        body = null;
      }
      return { status: response.status(), body };
    },
    async newPage(req) {
      const page = await lookup(contexts, 'context', req.context).newPage();
      const id = nextHandle++;
      pages.set(id, page);
      return { page: id };
    },
    async closePage(req) {
      const page = pages.get(req.page);
      if (page) {
        pages.delete(req.page);
        await page.close();
      }
      return {};
    },
    async goto(req) {
      const page = lookup(pages, 'page', req.page);
      const response = await page.goto(req.path, { waitUntil: 'networkidle', timeout: req.timeout_ms });
      return { url: page.url(), status: response ? response.status() : null };
    },
    async textContent(req) {
      const locator = lookup(pages, 'page', req.page).locator(req.selector);
      if ((await locator.count()) === 0) {
        return { text: null };
      }
      return { text: await locator.first().textContent() };
    },
  };

  const rl = readline.createInterface({ input: process.stdin });
  rl.on('line', async (line) => {
    let req;
    try {
      req = JSON.parse(line);
      const handler = handlers[req.op];
      if (!handler) {
        throw new Error(`unknown op ${req.op}`);
      }
      const result = await handler(req);
      send({ id: req.id, ok: true, result });
    } catch (error) {
      send({ id: req ? req.id : null, ok: false, error: error.message });
    }
  });
  rl.on('close', async () => {
    await browser.close();
    process.exit(0);
  });

  send({ ready: true });
})().catch((error) => {
  console.error(error.stack || error.message);
  process.exit(1);
});
"#;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl std::str::FromStr for Browser {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chromium" | "chrome" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" | "safari" => Ok(Browser::Webkit),
            other => Err(E2eError::Config(format!("unknown browser: {other}"))),
        }
    }
}

#[derive(Serialize)]
struct DriverLaunch<'a> {
    browser: &'static str,
    headless: bool,
    #[serde(rename = "baseUrl")]
    base_url: &'a str,
    viewport: Viewport,
}

#[derive(Serialize)]
struct Viewport {
    width: u32,
    height: u32,
}

/// One request to the driver; `op` selects the handler
#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
enum DriverCommand<'a> {
    NewContext,
    CloseContext {
        context: ContextId,
    },
    ClearCookies {
        context: ContextId,
    },
    Cookies {
        context: ContextId,
    },
    Request {
        context: ContextId,
        method: &'a str,
        path: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<&'a serde_json::Value>,
        timeout_ms: u64,
    },
    NewPage {
        context: ContextId,
    },
    ClosePage {
        page: PageId,
    },
    Goto {
        page: PageId,
        path: &'a str,
        timeout_ms: u64,
    },
    TextContent {
        page: PageId,
        selector: &'a str,
    },
}

#[derive(Serialize)]
struct Envelope<'a> {
    id: u64,
    #[serde(flatten)]
    command: DriverCommand<'a>,
}

#[derive(Debug, Deserialize)]
struct DriverReply {
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    ready: bool,
}

#[derive(Deserialize)]
struct ContextReply {
    context: ContextId,
}

#[derive(Deserialize)]
struct PageReply {
    page: PageId,
}

#[derive(Deserialize)]
struct CookiesReply {
    cookies: Vec<Cookie>,
}

#[derive(Deserialize)]
struct TextReply {
    text: Option<String>,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<DriverReply>>>>;

/// Playwright-backed browser engine
pub struct PlaywrightEngine {
    commands: Mutex<Option<mpsc::UnboundedSender<String>>>,
    pending: Pending,
    next_id: AtomicU64,
    exited: Arc<AtomicBool>,
    child: tokio::sync::Mutex<Option<Child>>,
    _script_dir: TempDir,
}

impl PlaywrightEngine {
    /// Start the driver process and wait until the browser is up
    pub async fn launch(
        config: &BrowserConfig,
        base_url: &str,
        startup_timeout: Duration,
    ) -> E2eResult<Self> {
        Self::check_playwright_installed()?;

        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("driver.js");
        std::fs::write(&script_path, DRIVER_SCRIPT)?;

        let launch = DriverLaunch {
            browser: config.kind.as_str(),
            headless: config.headless,
            base_url,
            viewport: Viewport {
                width: config.viewport_width,
                height: config.viewport_height,
            },
        };

        let mut cmd = TokioCommand::new("node");
        cmd.arg(&script_path)
            .env(DRIVER_ENV, serde_json::to_string(&launch)?)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(node_modules) = &config.node_modules {
            cmd.env("NODE_PATH", node_modules);
        }

        info!("Launching Playwright driver ({})", config.kind.as_str());
        let mut child = cmd
            .spawn()
            .map_err(|e| E2eError::Driver(format!("failed to spawn node: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| E2eError::Driver("driver stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::Driver("driver stdout unavailable".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "playwright", "{}", line);
                }
            });
        }

        let mut lines = BufReader::new(stdout).lines();
        tokio::time::timeout(startup_timeout, wait_for_ready(&mut lines))
            .await
            .map_err(|_| E2eError::Timeout("Playwright driver startup".to_string()))??;

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(line) = rx.recv().await {
                if stdin.write_all(line.as_bytes()).await.is_err()
                    || stdin.write_all(b"\n").await.is_err()
                    || stdin.flush().await.is_err()
                {
                    break;
                }
            }
        });

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let exited = Arc::new(AtomicBool::new(false));
        {
            let pending = pending.clone();
            let exited = exited.clone();
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    match serde_json::from_str::<DriverReply>(&line) {
                        Ok(reply) => match reply.id.and_then(|id| pending.lock().remove(&id)) {
                            Some(waiter) => {
                                let _ = waiter.send(reply);
                            }
                            None => warn!("Unmatched driver reply: {}", line),
                        },
                        Err(_) => debug!(target: "playwright", "{}", line),
                    }
                }
                exited.store(true, Ordering::SeqCst);
                // Dropping the senders wakes every waiter with an error
                pending.lock().clear();
            });
        }

        info!("Playwright driver ready");
        Ok(Self {
            commands: Mutex::new(Some(tx)),
            pending,
            next_id: AtomicU64::new(1),
            exited,
            child: tokio::sync::Mutex::new(Some(child)),
            _script_dir: script_dir,
        })
    }

    /// Check if Playwright is installed
    fn check_playwright_installed() -> E2eResult<()> {
        let output = Command::new("npx")
            .args(["playwright", "--version"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match output {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }

    async fn call(&self, command: DriverCommand<'_>) -> E2eResult<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = serde_json::to_string(&Envelope { id, command })?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let sent = match self.commands.lock().as_ref() {
            Some(commands) => commands.send(line).is_ok(),
            None => false,
        };
        if !sent || self.exited.load(Ordering::SeqCst) {
            self.pending.lock().remove(&id);
            return Err(E2eError::Driver("driver is not running".to_string()));
        }

        let reply = rx
            .await
            .map_err(|_| E2eError::Driver("driver exited while a request was in flight".to_string()))?;

        if reply.ok {
            Ok(reply.result)
        } else {
            Err(E2eError::Driver(
                reply.error.unwrap_or_else(|| "unknown driver error".to_string()),
            ))
        }
    }

    async fn call_as<T: serde::de::DeserializeOwned>(
        &self,
        command: DriverCommand<'_>,
    ) -> E2eResult<T> {
        let value = self.call(command).await?;
        Ok(serde_json::from_value(value)?)
    }
}

async fn wait_for_ready(lines: &mut Lines<BufReader<ChildStdout>>) -> E2eResult<()> {
    while let Some(line) = lines.next_line().await? {
        match serde_json::from_str::<DriverReply>(&line) {
            Ok(reply) if reply.ready => return Ok(()),
            _ => debug!(target: "playwright", "{}", line),
        }
    }
    Err(E2eError::Driver(
        "driver exited before becoming ready".to_string(),
    ))
}

#[async_trait]
impl BrowserEngine for PlaywrightEngine {
    async fn new_context(&self) -> E2eResult<ContextId> {
        let reply: ContextReply = self
            .call_as(DriverCommand::NewContext)
            .await
            .map_err(|e| E2eError::Engine(format!("failed to create browser context: {e}")))?;
        Ok(reply.context)
    }

    async fn close_context(&self, context: ContextId) -> E2eResult<()> {
        self.call(DriverCommand::CloseContext { context }).await?;
        Ok(())
    }

    async fn clear_cookies(&self, context: ContextId) -> E2eResult<()> {
        self.call(DriverCommand::ClearCookies { context }).await?;
        Ok(())
    }

    async fn cookies(&self, context: ContextId) -> E2eResult<Vec<Cookie>> {
        let reply: CookiesReply = self.call_as(DriverCommand::Cookies { context }).await?;
        Ok(reply.cookies)
    }

    async fn request(
        &self,
        context: ContextId,
        request: ApiRequest,
        timeout: Duration,
    ) -> E2eResult<ApiResponse> {
        self.call_as(DriverCommand::Request {
            context,
            method: &request.method,
            path: &request.path,
            body: request.body.as_ref(),
            timeout_ms: timeout.as_millis() as u64,
        })
        .await
    }

    async fn new_page(&self, context: ContextId) -> E2eResult<PageId> {
        let reply: PageReply = self.call_as(DriverCommand::NewPage { context }).await?;
        Ok(reply.page)
    }

    async fn close_page(&self, page: PageId) -> E2eResult<()> {
        self.call(DriverCommand::ClosePage { page }).await?;
        Ok(())
    }

    async fn goto(&self, page: PageId, path: &str, timeout: Duration) -> E2eResult<Navigation> {
        self.call_as(DriverCommand::Goto {
            page,
            path,
            timeout_ms: timeout.as_millis() as u64,
        })
        .await
        .map_err(|e| E2eError::NavigationFailure {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    async fn text_content(&self, page: PageId, selector: &str) -> E2eResult<Option<String>> {
        let reply: TextReply = self
            .call_as(DriverCommand::TextContent { page, selector })
            .await?;
        Ok(reply.text)
    }

    async fn shutdown(&self) -> E2eResult<()> {
        // Closing stdin makes the driver close the browser and exit
        self.commands.lock().take();

        let mut child = self.child.lock().await;
        if let Some(mut process) = child.take() {
            match tokio::time::timeout(Duration::from_secs(5), process.wait()).await {
                Ok(status) => {
                    let status = status?;
                    debug!("Playwright driver exited: {}", status);
                }
                Err(_) => {
                    warn!("Playwright driver did not exit, killing it");
                    process.kill().await?;
                }
            }
        }
        info!("Playwright driver stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_serialize_with_op_and_id() {
        let body = serde_json::json!({ "name": "guest" });
        let line = serde_json::to_string(&Envelope {
            id: 7,
            command: DriverCommand::Request {
                context: ContextId(3),
                method: "POST",
                path: "/api/auth/guest",
                body: Some(&body),
                timeout_ms: 1000,
            },
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();

        assert_eq!(value["id"], 7);
        assert_eq!(value["op"], "request");
        assert_eq!(value["context"], 3);
        assert_eq!(value["body"]["name"], "guest");
        assert_eq!(value["timeout_ms"], 1000);
    }

    #[test]
    fn unit_command_serializes_to_op_only() {
        let line = serde_json::to_string(&Envelope {
            id: 1,
            command: DriverCommand::NewContext,
        })
        .unwrap();
        assert_eq!(line, r#"{"id":1,"op":"newContext"}"#);
    }

    #[test]
    fn ops_match_driver_handlers() {
        for op in [
            "newContext",
            "closeContext",
            "clearCookies",
            "cookies",
            "request",
            "newPage",
            "closePage",
            "goto",
            "textContent",
        ] {
            assert!(
                DRIVER_SCRIPT.contains(&format!("async {op}(")),
                "driver has no handler for {op}"
            );
        }
    }

    #[test]
    fn parses_replies() {
        let ready: DriverReply = serde_json::from_str(r#"{"ready":true}"#).unwrap();
        assert!(ready.ready);
        assert_eq!(ready.id, None);

        let failed: DriverReply =
            serde_json::from_str(r#"{"id":4,"ok":false,"error":"Timeout 100ms exceeded"}"#).unwrap();
        assert_eq!(failed.id, Some(4));
        assert!(!failed.ok);
        assert_eq!(failed.error.as_deref(), Some("Timeout 100ms exceeded"));
    }

    #[test]
    fn browser_parses_aliases() {
        assert_eq!("chrome".parse::<Browser>().unwrap(), Browser::Chromium);
        assert_eq!("webkit".parse::<Browser>().unwrap(), Browser::Webkit);
        assert!("netscape".parse::<Browser>().is_err());
    }
}
