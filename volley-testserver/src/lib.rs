use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{Json, Router};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

pub const PATH_BOOKS: &str = "/api/v1/books";
pub const PATH_BOOK: &str = "/api/v1/books/{id}";
pub const PATH_BORROW: &str = "/api/v1/books/{id}/borrow";
pub const PATH_RETURN: &str = "/api/v1/books/{id}/return";

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    books_created: Arc<AtomicU64>,
    rejected: Arc<AtomicU64>,
}

impl TestServerStats {
    fn inc_requests_total(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_books_created(&self) {
        self.books_created.fetch_add(1, Ordering::Relaxed);
    }

    fn inc_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn books_created(&self) -> u64 {
        self.books_created.load(Ordering::Relaxed)
    }

    /// Requests answered with a 4xx or an injected 5xx.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
struct Book {
    #[serde(rename = "ID")]
    id: String,
    title: String,
    author: String,
    is_borrowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    borrower_email: Option<String>,
}

#[derive(Debug, Default)]
struct Catalog {
    books: BTreeMap<u64, Book>,
    next_id: u64,
}

/// Shared state of one server instance.
#[derive(Debug, Clone, Default)]
pub struct Library {
    catalog: Arc<Mutex<Catalog>>,
    fail_creates: Arc<AtomicBool>,
    stats: TestServerStats,
}

impl Library {
    fn catalog(&self) -> MutexGuard<'_, Catalog> {
        self.catalog.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// While set, `POST /api/v1/books` answers 500.
    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::Relaxed);
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.catalog().books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds a book directly, bypassing the fault switch and request stats. Returns its id.
    pub fn add_book(&self, title: impl Into<String>, author: impl Into<String>) -> String {
        self.insert(title.into(), author.into()).id
    }

    fn insert(&self, title: String, author: String) -> Book {
        let mut catalog = self.catalog();
        catalog.next_id += 1;
        let seq = catalog.next_id;
        let book = Book {
            id: format!("book-{seq}"),
            title,
            author,
            is_borrowed: false,
            borrower_email: None,
        };
        catalog.books.insert(seq, book.clone());
        book
    }

    fn reject(&self, status: StatusCode, error: impl Into<String>) -> Response {
        self.stats.inc_rejected();
        (status, Json(json!({ "error": error.into() }))).into_response()
    }
}

fn parse_id(raw: &str) -> Option<u64> {
    raw.strip_prefix("book-")?.parse().ok()
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct AddBookRequest {
    #[serde(default)]
    title: String,
    #[serde(default)]
    author: String,
}

#[derive(Debug, Deserialize)]
struct BorrowRequest {
    #[serde(default)]
    borrower_email: String,
}

async fn handle_list(State(lib): State<Library>, Query(query): Query<ListQuery>) -> Response {
    lib.stats.inc_requests_total();

    let limit = match query.limit {
        Some(0) | None => DEFAULT_LIMIT,
        Some(n) => n.min(MAX_LIMIT),
    };
    let offset = query.offset.unwrap_or(0);

    let catalog = lib.catalog();
    let books: Vec<&Book> = catalog.books.values().skip(offset).take(limit).collect();
    Json(json!({
        "Books": books,
        "Total": catalog.books.len(),
        "Limit": limit,
        "Offset": offset,
    }))
    .into_response()
}

async fn handle_add(State(lib): State<Library>, body: axum::body::Bytes) -> Response {
    lib.stats.inc_requests_total();

    if lib.fail_creates.load(Ordering::Relaxed) {
        return lib.reject(StatusCode::INTERNAL_SERVER_ERROR, "injected failure");
    }

    let req: AddBookRequest = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(err) => return lib.reject(StatusCode::BAD_REQUEST, err.to_string()),
    };
    if req.title.trim().is_empty() || req.author.trim().is_empty() {
        return lib.reject(StatusCode::BAD_REQUEST, "title and author are required");
    }

    let book = lib.insert(req.title, req.author);
    lib.stats.inc_books_created();
    (StatusCode::CREATED, Json(book)).into_response()
}

async fn handle_get(State(lib): State<Library>, Path(id): Path<String>) -> Response {
    lib.stats.inc_requests_total();

    let found = parse_id(&id).and_then(|seq| lib.catalog().books.get(&seq).cloned());
    match found {
        Some(book) => Json(book).into_response(),
        None => lib.reject(StatusCode::NOT_FOUND, format!("book {id} not found")),
    }
}

async fn handle_borrow(
    State(lib): State<Library>,
    Path(id): Path<String>,
    body: axum::body::Bytes,
) -> Response {
    lib.stats.inc_requests_total();

    let req: BorrowRequest = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(err) => return lib.reject(StatusCode::BAD_REQUEST, err.to_string()),
    };
    if !req.borrower_email.contains('@') {
        return lib.reject(StatusCode::BAD_REQUEST, "borrower_email is required");
    }

    let mut catalog = lib.catalog();
    let Some(book) = parse_id(&id).and_then(|seq| catalog.books.get_mut(&seq)) else {
        return lib.reject(StatusCode::BAD_REQUEST, format!("book {id} not found"));
    };
    if book.is_borrowed {
        return lib.reject(StatusCode::BAD_REQUEST, format!("book {id} is already borrowed"));
    }
    book.is_borrowed = true;
    book.borrower_email = Some(req.borrower_email);
    let book = book.clone();
    drop(catalog);

    Json(book).into_response()
}

async fn handle_return(State(lib): State<Library>, Path(id): Path<String>) -> Response {
    lib.stats.inc_requests_total();

    let mut catalog = lib.catalog();
    let Some(book) = parse_id(&id).and_then(|seq| catalog.books.get_mut(&seq)) else {
        return lib.reject(StatusCode::BAD_REQUEST, format!("book {id} not found"));
    };
    if !book.is_borrowed {
        return lib.reject(StatusCode::BAD_REQUEST, format!("book {id} is not borrowed"));
    }
    book.is_borrowed = false;
    book.borrower_email = None;
    let book = book.clone();
    drop(catalog);

    Json(book).into_response()
}

pub fn router(library: Library) -> Router {
    Router::new()
        .route(PATH_BOOKS, get(handle_list).post(handle_add))
        .route(PATH_BOOK, get(handle_get))
        .route(PATH_BORROW, post(handle_borrow))
        .route(PATH_RETURN, post(handle_return))
        .with_state(library)
}

pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    library: Library,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let library = Library::default();
        let app = router(library.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            base_url: format!("http://{addr}"),
            library,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn stats(&self) -> &TestServerStats {
        self.library.stats()
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
