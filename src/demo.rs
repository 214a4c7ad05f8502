//! The bundled demo application: two clients, a JSON info route, and the
//! built-in responders.

use std::path::Path;

use anyhow::Context;
use pagestream_protocol::ClientOpError;
use pagestream_server::{
    AppOptions, Application, ClientBuilder, EchoResponder, PageRequest, PublishOptions, PublishResponder,
    Rendered, RouteTarget, ServeError,
};
use serde_json::json;

pub fn build(options: AppOptions) -> anyhow::Result<Application> {
    let mut app = Application::new(options).context("invalid startup options")?;

    let main = app
        .client(
            ClientBuilder::new("main")
                .on("sync", |client, _| Ok(json!({ "view": client.view_name(), "synced": true })))
                .on("describe", |client, _| Ok(json!(client.paths().code))),
        )
        .context("registering main client")?;

    let admin = app
        .client(
            ClientBuilder::new("admin")
                .on("sync", |client, args| {
                    if args.first().and_then(|a| a.as_bool()) == Some(true) {
                        Ok(json!({ "view": client.view_name(), "synced": true }))
                    } else {
                        Err(ClientOpError::new("admin sync requires confirmation"))
                    }
                }),
        )
        .context("registering admin client")?;

    app.route("/", main)?;
    app.route("/admin", admin)?;

    let context = app.context().clone();
    app.route(
        "/api/info",
        RouteTarget::handler(move |_: &PageRequest| {
            Ok::<_, ServeError>(Rendered::json(&json!({
                "id": context.id(),
                "env": context.env(),
                "version": context.version(),
            })))
        }),
    )?;

    app.responder("echo", EchoResponder);
    app.register_responder("publish", PublishResponder::factory, PublishOptions::default());

    // Templates are bundled as inert script tags keyed by file stem.
    app.preprocessor(["html", "htm"], |source: String, file: &Path| {
        let id = file.file_stem().and_then(|s| s.to_str()).unwrap_or("template");
        Ok::<_, ServeError>(format!("<script type=\"text/template\" id=\"{id}\">{source}</script>"))
    });

    Ok(app)
}
