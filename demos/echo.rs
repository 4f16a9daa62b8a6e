use corehttpd::{Request, Response, Scope, Server, StatusCode};

fn echo(_data: &mut (), req: &Request, resp: &mut Response) {
    let result = format!(
        r#"{{"url": {:?}, "body": {:?}}}"#,
        req.url.path(),
        String::from_utf8_lossy(&req.body),
    );

    resp.status(StatusCode::Ok).set_header("content-type", "application/json");
    resp.body_str(result);
}

fn main() -> std::io::Result<()> {
    let server = Server::<()>::builder()
        .listen("127.0.0.1:8080".parse().unwrap())
        .route("POST", "/", Scope::Inherit, echo)
        .build()?;

    let _handle = server.launch()?;
    println!("listening on http://127.0.0.1:8080");
    loop {
        std::thread::sleep(std::time::Duration::from_secs(3600));
    }
}
