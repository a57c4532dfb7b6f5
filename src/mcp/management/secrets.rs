// ABOUTME: Management handlers for server secrets: placeholder creation and key listing
// ABOUTME: Values never travel this surface; the admin UI is the only writer of secret values

use super::{required_str, uuid_arg};
use crate::context::ServerResources;
use crate::database::is_unique_violation;
use crate::services::SecretService;
use serde_json::{json, Value};

pub(super) async fn create_server_secret(resources: &ServerResources, args: &Value) -> Value {
    let server_id = match uuid_arg(args, "server_id") {
        Ok(id) => id,
        Err(err) => return err,
    };
    let key = match required_str(args, "key") {
        Ok(key) => key,
        Err(err) => return err,
    };
    let description = args.get("description").and_then(Value::as_str);

    if resources
        .database
        .get_server(server_id)
        .await
        .ok()
        .flatten()
        .is_none()
    {
        return json!({ "error": format!("Server {server_id} not found") });
    }

    let service = SecretService::new(resources.database.clone(), resources.cipher.clone());
    match service
        .create_placeholder(server_id, key, description)
        .await
    {
        Ok(secret) => json!({
            "success": true,
            "server_id": server_id.to_string(),
            "key": secret.key_name,
            "description": secret.description,
            "has_value": false,
            "message": format!(
                "Secret placeholder '{key}' created. \
                 An admin must set the value in the MCPbox UI before it can be used."
            ),
        }),
        Err(err) if is_unique_violation(&err) => {
            json!({ "error": format!("Secret '{key}' already exists for this server") })
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to create secret");
            json!({ "error": "Failed to create secret due to an internal error" })
        }
    }
}

pub(super) async fn list_server_secrets(resources: &ServerResources, args: &Value) -> Value {
    let server_id = match uuid_arg(args, "server_id") {
        Ok(id) => id,
        Err(err) => return err,
    };

    let server = match resources.database.get_server(server_id).await {
        Ok(Some(server)) => server,
        Ok(None) => return json!({ "error": format!("Server {server_id} not found") }),
        Err(err) => {
            tracing::error!(error = %err, "failed to load server");
            return json!({ "error": "Failed to list secrets due to an internal error" });
        }
    };

    let service = SecretService::new(resources.database.clone(), resources.cipher.clone());
    match service.list(server_id).await {
        Ok(secrets) => json!({
            "server_id": server_id.to_string(),
            "server_name": server.name,
            "secrets": secrets.iter().map(|s| json!({
                "key": s.key_name,
                "description": s.description,
                "has_value": s.has_value(),
            })).collect::<Vec<_>>(),
            "total": secrets.len(),
        }),
        Err(err) => {
            tracing::error!(error = %err, "failed to list secrets");
            json!({ "error": "Failed to list secrets due to an internal error" })
        }
    }
}
