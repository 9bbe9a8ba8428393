mod database;
mod routes;
mod tracing_helper;

use std::env;

use crate::database::File;

#[allow(unused)]
fn file_database() -> File {
    env::var("STORE_PATH")
        .map(File::new)
        .unwrap_or_default()
}

mod local {
    use std::env::args;

    use anyhow::{anyhow, Context};
    use lambda_http::{
        http::{header::AUTHORIZATION, request::Builder, Method},
        Body, Request,
    };
    use tracing::info;

    use crate::{routes::routes, tracing_helper};

    /// `teleconsult-server <METHOD> <URI> [BODY]`, against the JSON file
    /// database.
    #[allow(unused)]
    pub async fn main() -> anyhow::Result<()> {
        tracing_helper::init_local_tracing();

        let mut args = args();
        let method = args.nth(1).ok_or_else(|| anyhow!("METHOD is required"))?;
        let uri = args.next().ok_or_else(|| anyhow!("URI is required"))?;
        let body = args.next().map(Body::Text).unwrap_or(Body::Empty);

        let req: Request = Builder::new()
            .method(Method::from_bytes(method.as_bytes()).context("invalid METHOD")?)
            .uri(uri)
            .header(AUTHORIZATION, "Bearer local")
            .body(body)?;
        let db = super::file_database();
        let res = routes(&req, &db).await?;
        info!("{} {:?}", res.status(), res.body());
        Ok(())
    }
}

mod lambda {
    use lambda_http::{service_fn, IntoResponse, Request};

    use crate::{database, routes::routes, tracing_helper};

    async fn func(req: Request) -> Result<impl IntoResponse, anyhow::Error> {
        let db = database::DynamoDB::new().await?;
        routes(&req, &db).await
    }

    #[allow(unused)]
    pub async fn main() -> Result<(), lambda_http::Error> {
        tracing_helper::init_lambda_tracing();

        lambda_http::run(service_fn(func)).await
    }
}

#[cfg(not(target_os = "linux"))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    local::main().await
}

#[cfg(target_os = "linux")]
#[tokio::main]
async fn main() -> Result<(), lambda_http::Error> {
    lambda::main().await
}
