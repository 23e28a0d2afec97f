//! Scriptable SMTP server for exercising the mailer end to end.
//!
//! Each builder knob sets the reply for one step of the transaction;
//! RCPT TO replies can be scripted per-recipient. Every command line the
//! server receives is recorded for assertions, and message bodies are
//! captured separately.
#![allow(dead_code)] // test utility; not every test uses every knob

use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};

#[derive(Debug, Clone)]
struct Reply {
    code: u16,
    text: String,
}

impl Reply {
    fn new(code: u16, text: &str) -> Self {
        Self {
            code,
            text: text.to_string(),
        }
    }

    fn line(&self) -> String {
        format!("{} {}\r\n", self.code, self.text)
    }
}

#[derive(Debug, Clone)]
struct Script {
    greeting: Reply,
    ehlo_capabilities: Vec<String>,
    auth: Reply,
    mail_from: Reply,
    rcpt_to: VecDeque<Reply>,
    rcpt_to_default: Reply,
    data: Reply,
    data_end: Reply,
    starttls: Option<Reply>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            greeting: Reply::new(220, "mock ESMTP ready"),
            ehlo_capabilities: vec!["mock.example.com".to_string(), "SIZE 10000000".to_string()],
            auth: Reply::new(235, "Authentication succeeded"),
            mail_from: Reply::new(250, "OK"),
            rcpt_to: VecDeque::new(),
            rcpt_to_default: Reply::new(250, "OK"),
            data: Reply::new(354, "End data with <CR><LF>.<CR><LF>"),
            data_end: Reply::new(250, "OK: queued"),
            starttls: None,
        }
    }
}

/// A mock SMTP server bound to an ephemeral local port.
pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<Mutex<Vec<String>>>,
    bodies: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockSmtpServer {
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            script: Script::default(),
        }
    }

    /// Start a server that accepts everything.
    pub async fn start() -> Self {
        Self::builder().build().await
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Every command line received so far, verbatim minus the CRLF.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// Message bodies received through DATA, with wire framing intact.
    pub fn bodies(&self) -> Vec<Vec<u8>> {
        self.bodies.lock().unwrap().clone()
    }
}

pub struct MockSmtpServerBuilder {
    script: Script,
}

impl MockSmtpServerBuilder {
    pub fn with_ehlo_capability(mut self, capability: &str) -> Self {
        self.script.ehlo_capabilities.push(capability.to_string());
        self
    }

    pub fn with_starttls_reply(mut self, code: u16, text: &str) -> Self {
        self.script.starttls = Some(Reply::new(code, text));
        self
    }

    pub fn with_auth_reply(mut self, code: u16, text: &str) -> Self {
        self.script.auth = Reply::new(code, text);
        self
    }

    pub fn with_mail_from_reply(mut self, code: u16, text: &str) -> Self {
        self.script.mail_from = Reply::new(code, text);
        self
    }

    /// Queue a reply for the next RCPT TO; once the queue drains, the
    /// default reply applies.
    pub fn push_rcpt_to_reply(mut self, code: u16, text: &str) -> Self {
        self.script.rcpt_to.push_back(Reply::new(code, text));
        self
    }

    /// Reply for every RCPT TO not covered by the scripted queue.
    pub fn with_rcpt_to_reply(mut self, code: u16, text: &str) -> Self {
        self.script.rcpt_to_default = Reply::new(code, text);
        self
    }

    pub fn with_data_end_reply(mut self, code: u16, text: &str) -> Self {
        self.script.data_end = Reply::new(code, text);
        self
    }

    pub async fn build(self) -> MockSmtpServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let commands = Arc::new(Mutex::new(Vec::new()));
        let bodies = Arc::new(Mutex::new(Vec::new()));

        let script = self.script;
        let commands_task = Arc::clone(&commands);
        let bodies_task = Arc::clone(&bodies);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let script = script.clone();
                let commands = Arc::clone(&commands_task);
                let bodies = Arc::clone(&bodies_task);
                tokio::spawn(async move {
                    let _ = serve_client(stream, script, commands, bodies).await;
                });
            }
        });

        MockSmtpServer {
            addr,
            commands,
            bodies,
        }
    }
}

async fn serve_client(
    mut stream: TcpStream,
    script: Script,
    commands: Arc<Mutex<Vec<String>>>,
    bodies: Arc<Mutex<Vec<Vec<u8>>>>,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);
    let mut rcpt_replies = script.rcpt_to.clone();

    writer.write_all(script.greeting.line().as_bytes()).await?;

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let command = line.trim_end().to_string();
        commands.lock().unwrap().push(command.clone());

        let verb = command
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        match verb.as_str() {
            "EHLO" | "HELO" => {
                let mut reply = String::new();
                let last = script.ehlo_capabilities.len().saturating_sub(1);
                for (i, capability) in script.ehlo_capabilities.iter().enumerate() {
                    let sep = if i == last { ' ' } else { '-' };
                    reply.push_str(&format!("250{sep}{capability}\r\n"));
                }
                writer.write_all(reply.as_bytes()).await?;
            }
            "STARTTLS" => {
                let reply = script
                    .starttls
                    .clone()
                    .unwrap_or_else(|| Reply::new(502, "command not implemented"));
                writer.write_all(reply.line().as_bytes()).await?;
                // The mock never actually negotiates TLS; scripts only use
                // non-2xx STARTTLS replies.
            }
            "AUTH" => {
                writer.write_all(script.auth.line().as_bytes()).await?;
            }
            "MAIL" => {
                writer.write_all(script.mail_from.line().as_bytes()).await?;
            }
            "RCPT" => {
                let reply = rcpt_replies
                    .pop_front()
                    .unwrap_or_else(|| script.rcpt_to_default.clone());
                writer.write_all(reply.line().as_bytes()).await?;
            }
            "DATA" => {
                writer.write_all(script.data.line().as_bytes()).await?;
                if script.data.code == 354 {
                    let mut body = Vec::new();
                    loop {
                        line.clear();
                        if reader.read_line(&mut line).await? == 0 {
                            return Ok(());
                        }
                        if line.trim_end() == "." {
                            break;
                        }
                        body.extend_from_slice(line.as_bytes());
                    }
                    bodies.lock().unwrap().push(body);
                    writer.write_all(script.data_end.line().as_bytes()).await?;
                }
            }
            "QUIT" => {
                writer.write_all(b"221 bye\r\n").await?;
                return Ok(());
            }
            _ => {
                writer.write_all(b"500 unknown command\r\n").await?;
            }
        }
    }
}
