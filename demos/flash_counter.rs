use gosub_sessions::{
    codec::{generate_random_key, KeyPair},
    config::{Options, SameSite},
    get_session, save, CookieStore, FilesystemStore,
};

use http::header::{COOKIE, SET_COOKIE};
use http::{HeaderMap, HeaderValue, Request};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    // Keys would normally come from configuration. The first pair signs new cookies, the
    // second one is an older key that is still accepted while clients migrate.
    let keys = [
        KeyPair::with_encryption(generate_random_key(32), generate_random_key(32)),
        KeyPair::new(b"previous-hash-key".to_vec()),
    ];

    // The cookie store keeps everything in the cookie. Options are the defaults for every
    // session it issues; sessions get their own copy.
    let cookies = CookieStore::new(&keys)?;
    cookies.set_options(
        Options::builder()
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .max_age(3600)
            .build()?,
    );

    // The filesystem store only puts an id in the cookie and keeps the values on disk.
    let dir = tempfile::tempdir()?;
    let files = FilesystemStore::new(dir.path(), &keys)?;

    let mut jar: Vec<String> = Vec::new();
    for round in 1..=3 {
        let mut request = Request::get("http://localhost:8080/").body(())?;
        if !jar.is_empty() {
            request.headers_mut().insert(COOKIE, HeaderValue::from_str(&jar.join("; "))?);
        }

        // Both sessions are resolved through the registry attached to this request, so asking
        // twice would hand back the same session.
        let flash = get_session(&mut request, &*cookies, "flash")?;
        let counter = get_session(&mut request, &*files, "counter")?;

        let messages = flash.session.write().expect("flash session lock").flashes();
        let visits = {
            let mut session = counter.session.write().expect("counter session lock");
            let visits = session.get::<u64>("visits")?.unwrap_or(0) + 1;
            session.insert("visits", visits)?;
            visits
        };
        println!("request {round}: visit #{visits}, flashes from last request: {messages:?}");

        flash.session.write().expect("flash session lock").add_flash(format!("hello from request {round}"))?;

        // Persist everything touched during this request.
        let mut response = HeaderMap::new();
        save(&request, &mut response)?;

        // Act as the browser: remember name=value of each Set-Cookie.
        jar = response
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .map(str::to_string)
            .collect();
    }

    Ok(())
}
