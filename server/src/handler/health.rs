use resources::models::ApiBody;

pub async fn health() -> ApiBody {
    ApiBody::new("healthy").field("version", env!("CARGO_PKG_VERSION"))
}
