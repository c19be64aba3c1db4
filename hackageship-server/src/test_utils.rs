use crate::database::prelude::*;
use crate::release::{
    release_queue, CommandError, ReleaseReceiver, Toolchain, UploadError, Uploader,
};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub async fn make_database() -> StateDatabase {
    StateDatabase::open("sqlite::memory:").await.unwrap()
}

pub async fn make_backend() -> (crate::Backend, ReleaseReceiver) {
    let (queue, receiver) = release_queue(100);
    let backend = Arc::new(crate::backend::DefaultBackend {
        database: make_database().await,
        release_queue: queue,
    });

    (backend, receiver)
}

pub async fn register(
    db: &crate::Backend,
    user: &str,
    project: &str,
    secret: &str,
    activated: bool,
) {
    db.register_project(user, project, secret, activated)
        .await
        .unwrap();
}

/// Signs like GitHub's `X-Hub-Signature` header.
pub fn sign_body(body: &[u8], secret: &str) -> String {
    let mut mac = Hmac::<sha1::Sha1>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
}

pub type EventLog = Arc<Mutex<Vec<String>>>;

#[cfg(unix)]
fn exit_status(code: i32) -> std::process::ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    std::process::ExitStatus::from_raw(code << 8)
}

#[cfg(windows)]
fn exit_status(code: i32) -> std::process::ExitStatus {
    use std::os::windows::process::ExitStatusExt;
    std::process::ExitStatus::from_raw(code as u32)
}

fn failed(command: String, output: &str) -> CommandError {
    CommandError::Failed {
        command,
        status: exit_status(128),
        output: output.to_owned(),
    }
}

/// What a fake clone produces, and how the later steps behave on it.
#[derive(Debug, Clone, Default)]
pub struct FakeRepository {
    pub files: Vec<(String, Vec<u8>)>,
    /// Link name and target, both relative to the checkout.
    pub symlinks: Vec<(String, String)>,
    /// Paths, relative to the checkout, written by a successful build.
    pub sdist_outputs: Vec<String>,
    pub fail_checkout: bool,
    pub fail_build: bool,
}

impl FakeRepository {
    pub fn cabal(name: &str, version: &str) -> Self {
        let manifest = format!(
            "cabal-version: 2.4\nname: {}\nversion: {}\nbuild-type: Simple\n",
            name, version
        );
        Self {
            files: vec![
                (format!("{}.cabal", name), manifest.into_bytes()),
                ("README.md".to_owned(), b"# readme".to_vec()),
            ],
            symlinks: Vec::new(),
            sdist_outputs: vec![format!("dist/{}-{}.tar.gz", name, version)],
            fail_checkout: false,
            fail_build: false,
        }
    }
}

/// Stands in for git and cabal. Every call is appended to the event log, and
/// a clone fails loudly if an earlier job's workspace still exists.
pub struct FakeToolchain {
    repositories: HashMap<String, FakeRepository>,
    events: EventLog,
    current: Mutex<Option<FakeRepository>>,
    workspaces: Mutex<Vec<PathBuf>>,
}

impl FakeToolchain {
    pub fn new(events: EventLog) -> Self {
        Self {
            repositories: HashMap::new(),
            events,
            current: Mutex::new(None),
            workspaces: Mutex::new(Vec::new()),
        }
    }

    pub fn with_repository(mut self, clone_url: &str, repository: FakeRepository) -> Self {
        self.repositories.insert(clone_url.to_owned(), repository);
        self
    }

    pub fn events(&self) -> EventLog {
        self.events.clone()
    }

    fn log(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn current(&self) -> FakeRepository {
        self.current.lock().unwrap().clone().unwrap_or_default()
    }
}

#[async_trait]
impl Toolchain for FakeToolchain {
    async fn clone_repository(
        &self,
        clone_url: &str,
        destination: &Path,
    ) -> Result<(), CommandError> {
        {
            let mut workspaces = self.workspaces.lock().unwrap();
            for previous in workspaces.iter() {
                assert!(
                    !previous.exists(),
                    "{} was still around when the next job started",
                    previous.display()
                );
            }
            workspaces.push(destination.to_owned());
        }
        assert!(destination.is_dir(), "clone destination must exist");

        self.log(format!("clone {}", clone_url));
        let repository = match self.repositories.get(clone_url) {
            Some(repository) => repository.clone(),
            None => {
                let host = clone_url.split('/').nth(2).unwrap_or(clone_url);
                return Err(failed(
                    format!("git clone --quiet {} {}", clone_url, destination.display()),
                    &format!(
                        "fatal: unable to access '{}': Could not resolve host: {}",
                        clone_url, host
                    ),
                ));
            }
        };

        for (name, contents) in &repository.files {
            std::fs::write(destination.join(name), contents).unwrap();
        }
        #[cfg(unix)]
        for (name, target) in &repository.symlinks {
            std::os::unix::fs::symlink(destination.join(target), destination.join(name)).unwrap();
        }
        *self.current.lock().unwrap() = Some(repository);
        Ok(())
    }

    async fn checkout_tag(&self, checkout: &Path, tag: &str) -> Result<(), CommandError> {
        assert!(checkout.is_dir());
        self.log(format!("checkout tags/{}", tag));
        if self.current().fail_checkout {
            return Err(failed(
                format!("git checkout --quiet tags/{}", tag),
                &format!("error: pathspec 'tags/{}' did not match", tag),
            ));
        }
        Ok(())
    }

    async fn build_source_distribution(&self, checkout: &Path) -> Result<(), CommandError> {
        self.log("build".to_owned());
        let repository = self.current();
        if repository.fail_build {
            return Err(failed("cabal sdist".to_owned(), "Error: the package has no library"));
        }

        for output in &repository.sdist_outputs {
            let path = checkout.join(output);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, b"tarball").unwrap();
        }
        Ok(())
    }
}

pub struct FakeUploader {
    events: EventLog,
    reject_status: Option<u16>,
}

impl FakeUploader {
    pub fn accepting(events: EventLog) -> Self {
        Self {
            events,
            reject_status: None,
        }
    }

    pub fn rejecting(events: EventLog, status: u16) -> Self {
        Self {
            events,
            reject_status: Some(status),
        }
    }
}

#[async_trait]
impl Uploader for FakeUploader {
    async fn upload(&self, archive: &Path) -> Result<(), UploadError> {
        assert!(archive.is_file(), "{} should exist", archive.display());
        let name = archive.file_name().unwrap().to_string_lossy().into_owned();
        self.events.lock().unwrap().push(format!("upload {}", name));

        match self.reject_status {
            Some(status) => Err(UploadError::Rejected {
                status,
                body: "Forbidden".to_owned(),
            }),
            None => Ok(()),
        }
    }
}

pub type TestResponse = warp::http::Response<warp::hyper::body::Bytes>;

fn parse_body(response: &TestResponse) -> json::JsonValue {
    let body = String::from_utf8(response.body().to_vec()).unwrap();
    println!("{:?}", body);
    match json::parse(&body) {
        Err(e) => {
            println!("Unable to deserialize {:?}. Error: {:?}", body, e);
            unreachable!()
        }
        Ok(body) => body,
    }
}

/// Parses a 200 envelope for field-by-field checks on bodies with
/// timestamps in them.
pub fn parse_ok_body(response: &TestResponse) -> json::JsonValue {
    let body = parse_body(response);
    assert_eq!(response.status(), warp::http::StatusCode::OK);
    assert_eq!(body["status"]["code"], 200);
    body
}

/// Listings come back as a bare JSON array.
pub fn parse_list_body(response: &TestResponse) -> json::JsonValue {
    let body = parse_body(response);
    assert_eq!(response.status(), warp::http::StatusCode::OK);
    assert!(body.is_array(), "expected an array, got {}", body);
    body
}

/// Webhook deliveries are acknowledged with a plain `OK`.
pub fn assert_ok_text(response: TestResponse) {
    assert_eq!(response.status(), warp::http::StatusCode::OK);
    assert_eq!(&response.body()[..], b"OK");
}

pub fn assert_error_response(
    response: TestResponse,
    status: warp::http::StatusCode,
    message: &str,
) {
    use json::object;
    let body = parse_body(&response);
    assert_eq!(
        json::stringify(body),
        json::stringify(object! {
            "status": { "code": response.status().as_u16(), "error": [message] },
        })
    );
    assert_eq!(response.status(), status);
}
