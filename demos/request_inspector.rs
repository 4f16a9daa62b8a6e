use corehttpd::{Request, Response, Scope, Server, StatusCode};

fn inspect(_data: &mut (), req: &Request, resp: &mut Response) {
    let user_agent = req
        .header("user-agent")
        .map(|v| format!(r#", "user_agent": {:?}"#, v))
        .unwrap_or_default();

    let content_type = req
        .header("content-type")
        .map(|v| format!(r#", "content_type": {:?}"#, v))
        .unwrap_or_default();

    let result = format!(
        r#"{{"method": "{}", "path": {:?}{user_agent}{content_type}, "body": {:?}}}"#,
        req.method.as_str(),
        req.url.path(),
        String::from_utf8_lossy(&req.body),
    );

    resp.status(StatusCode::Ok).set_header("content-type", "application/json");
    resp.body_str(result);
}

fn main() -> std::io::Result<()> {
    let server = Server::<()>::builder()
        .listen("127.0.0.1:8080".parse().unwrap())
        .route("GET", "/", Scope::Inherit, inspect)
        .build()?;

    let _handle = server.launch()?;
    println!("listening on http://127.0.0.1:8080");
    loop {
        std::thread::sleep(std::time::Duration::from_secs(3600));
    }
}
