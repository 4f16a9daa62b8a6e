use corehttpd::{Request, Response, Scope, Server, StatusCode};

fn hello(_data: &mut (), _req: &Request, resp: &mut Response) {
    resp.status(StatusCode::Ok).set_header("content-type", "text/plain");
    resp.body_str("Hello, world!");
}

fn main() -> std::io::Result<()> {
    let server = Server::<()>::builder()
        .listen("127.0.0.1:8080".parse().unwrap())
        .route("GET", "/", Scope::Exact, hello)
        .build()?;

    let _handle = server.launch()?;
    println!("listening on http://127.0.0.1:8080");
    loop {
        std::thread::sleep(std::time::Duration::from_secs(3600));
    }
}
