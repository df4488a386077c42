use bytes::Bytes;
use volley_http::{HttpClient, HttpRequest, HttpResponse};
use volley_testserver::TestServer;

fn json(res: &HttpResponse) -> serde_json::Value {
    serde_json::from_slice(&res.body).unwrap_or_else(|e| panic!("bad json: {e}"))
}

async fn post(client: &HttpClient, url: String, body: serde_json::Value) -> HttpResponse {
    let req = HttpRequest::post(url, Bytes::from(body.to_string()))
        .with_header("content-type", "application/json");
    client
        .request(req)
        .await
        .unwrap_or_else(|e| panic!("post: {e}"))
}

#[tokio::test]
async fn create_then_fetch_book() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let client = HttpClient::default();
    let base = server.base_url().to_string();

    let created = post(
        &client,
        format!("{base}/api/v1/books"),
        serde_json::json!({"title": "Dune", "author": "Herbert"}),
    )
    .await;
    anyhow::ensure!(created.status == 201, "status {}", created.status);
    let id = json(&created)["ID"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("no ID"))?;

    let fetched = client.get(&format!("{base}/api/v1/books/{id}")).await?;
    anyhow::ensure!(fetched.status == 200);
    anyhow::ensure!(json(&fetched)["ID"] == id.as_str());
    anyhow::ensure!(json(&fetched)["Title"] == "Dune");

    let listed = client.get(&format!("{base}/api/v1/books")).await?;
    let listed = json(&listed);
    anyhow::ensure!(listed["Total"] == 1);
    anyhow::ensure!(listed["Books"].as_array().map(Vec::len) == Some(1));

    anyhow::ensure!(server.stats().books_created() == 1);
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn validation_and_unknown_ids() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let client = HttpClient::default();
    let base = server.base_url().to_string();

    let missing_author = post(
        &client,
        format!("{base}/api/v1/books"),
        serde_json::json!({"title": "Untitled"}),
    )
    .await;
    anyhow::ensure!(missing_author.status == 400);

    let unknown = client.get(&format!("{base}/api/v1/books/book-999")).await?;
    anyhow::ensure!(unknown.status == 404);
    let garbage = client.get(&format!("{base}/api/v1/books/nope")).await?;
    anyhow::ensure!(garbage.status == 404);

    anyhow::ensure!(server.library().is_empty());
    anyhow::ensure!(server.stats().rejected() == 3);
    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn borrow_and_return_round() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let client = HttpClient::default();
    let base = server.base_url().to_string();

    let created = post(
        &client,
        format!("{base}/api/v1/books"),
        serde_json::json!({"title": "Emma", "author": "Austen"}),
    )
    .await;
    let id = json(&created)["ID"].as_str().unwrap_or_default().to_string();
    let borrow_url = format!("{base}/api/v1/books/{id}/borrow");
    let return_url = format!("{base}/api/v1/books/{id}/return");

    let not_borrowed = post(&client, return_url.clone(), serde_json::json!({})).await;
    anyhow::ensure!(not_borrowed.status == 400);

    let no_email = post(&client, borrow_url.clone(), serde_json::json!({})).await;
    anyhow::ensure!(no_email.status == 400);

    let email = serde_json::json!({"borrower_email": "reader@example.com"});
    let borrowed = post(&client, borrow_url.clone(), email.clone()).await;
    anyhow::ensure!(borrowed.status == 200);
    anyhow::ensure!(json(&borrowed)["IsBorrowed"] == true);

    let again = post(&client, borrow_url, email).await;
    anyhow::ensure!(again.status == 400);

    let returned = post(&client, return_url, serde_json::json!({})).await;
    anyhow::ensure!(returned.status == 200);
    anyhow::ensure!(json(&returned)["IsBorrowed"] == false);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn fault_switch_fails_creates() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let client = HttpClient::default();
    let url = format!("{}/api/v1/books", server.base_url());

    server.library().set_fail_creates(true);
    let res = post(&client, url.clone(), serde_json::json!({"title": "a", "author": "b"})).await;
    anyhow::ensure!(res.status == 500);

    server.library().set_fail_creates(false);
    let res = post(&client, url, serde_json::json!({"title": "a", "author": "b"})).await;
    anyhow::ensure!(res.status == 201);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn seeded_books_page_through_the_list() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    for n in 0..5 {
        server.library().add_book(format!("Seed {n}"), "Someone");
    }
    let client = HttpClient::default();
    let base = server.base_url().to_string();

    let page = client
        .get(&format!("{base}/api/v1/books?limit=2&offset=3"))
        .await?;
    let page = json(&page);
    anyhow::ensure!(page["Total"] == 5, "{page}");
    anyhow::ensure!(page["Limit"] == 2 && page["Offset"] == 3, "{page}");
    anyhow::ensure!(page["Books"][0]["ID"] == "book-4", "{page}");

    anyhow::ensure!(server.stats().books_created() == 0);
    anyhow::ensure!(server.library().len() == 5);
    server.shutdown().await;
    Ok(())
}
