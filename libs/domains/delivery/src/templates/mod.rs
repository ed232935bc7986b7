//! Email template rendering engine.
//!
//! Handlebars templates, one html + text pair per workflow, compiled once.

use crate::error::{DeliveryError, DeliveryResult};
use crate::workflows::WorkflowKind;
use handlebars::Handlebars;
use serde_json::{Map, Value};
use strum::IntoEnumIterator;
use tracing::debug;

/// Rendered email content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    /// Template-provided subject, if any.
    pub subject: Option<String>,
    pub html: String,
    pub text: String,
}

/// Turns a workflow payload into subject/html/text.
#[cfg_attr(test, mockall::automock)]
pub trait TemplateRenderer: Send + Sync {
    /// Render the templates registered for `workflow`.
    ///
    /// Returns [`DeliveryError::UnknownWorkflow`] when nothing is registered for it.
    fn render(&self, workflow: WorkflowKind, payload: &Map<String, Value>) -> DeliveryResult<RenderedEmail>;
}

/// Handlebars-backed renderer with every workflow's templates registered.
pub struct HandlebarsRenderer {
    handlebars: Handlebars<'static>,
}

impl HandlebarsRenderer {
    /// Create a renderer with all templates registered.
    pub fn new() -> DeliveryResult<Self> {
        let mut handlebars = Handlebars::new();

        for kind in WorkflowKind::iter() {
            let (html, text) = sources(kind);
            handlebars
                .register_template_string(&html_name(kind), html)
                .map_err(|e| DeliveryError::Template(format!("Failed to register {}: {}", html_name(kind), e)))?;
            handlebars
                .register_template_string(&text_name(kind), text)
                .map_err(|e| DeliveryError::Template(format!("Failed to register {}: {}", text_name(kind), e)))?;
        }

        Ok(Self { handlebars })
    }
}

impl TemplateRenderer for HandlebarsRenderer {
    fn render(&self, workflow: WorkflowKind, payload: &Map<String, Value>) -> DeliveryResult<RenderedEmail> {
        let html_template = html_name(workflow);
        let text_template = text_name(workflow);

        if !self.handlebars.has_template(&html_template) || !self.handlebars.has_template(&text_template) {
            return Err(DeliveryError::UnknownWorkflow(workflow.to_string()));
        }

        debug!(workflow = %workflow, "Rendering email templates");

        let html = self.handlebars.render(&html_template, payload)?;
        let text = self.handlebars.render(&text_template, payload)?;

        let subject = payload
            .get("subject")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(RenderedEmail { subject, html, text })
    }
}

fn html_name(kind: WorkflowKind) -> String {
    format!("{}_html", kind)
}

fn text_name(kind: WorkflowKind) -> String {
    format!("{}_text", kind)
}

fn sources(kind: WorkflowKind) -> (&'static str, &'static str) {
    match kind {
        WorkflowKind::VerificationCode => (VERIFICATION_HTML_TEMPLATE, VERIFICATION_TEXT_TEMPLATE),
        WorkflowKind::PasswordReset => (PASSWORD_RESET_HTML_TEMPLATE, PASSWORD_RESET_TEXT_TEMPLATE),
        WorkflowKind::Invite => (INVITE_HTML_TEMPLATE, INVITE_TEXT_TEMPLATE),
    }
}

// ============================================================================
// Templates
// ============================================================================

const VERIFICATION_HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Your verification code</title>
</head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h1 style="color: #1a1a1a; margin-bottom: 24px;">Your verification code</h1>
    {{#if name}}<p>Hi {{name}},</p>{{/if}}
    <p>Use the code below to finish signing in{{#if provider}} with {{provider}}{{/if}}:</p>
    <p style="font-size: 32px; font-weight: bold; letter-spacing: 8px; background: #f4f4f5; padding: 16px; text-align: center; border-radius: 6px;">{{#if code}}{{code}}{{else}}{{verification_code}}{{/if}}</p>
    {{#if expires_at}}<p style="color: #666; font-size: 14px;">This code expires at {{expires_at}}.</p>{{/if}}
    <p style="color: #666; font-size: 14px;">If you didn't request this code, you can safely ignore this email.</p>
</body>
</html>"#;

const VERIFICATION_TEXT_TEMPLATE: &str = r#"Your verification code
{{#if name}}
Hi {{{name}}},
{{/if}}
Use the code below to finish signing in{{#if provider}} with {{{provider}}}{{/if}}:

    {{#if code}}{{{code}}}{{else}}{{{verification_code}}}{{/if}}
{{#if expires_at}}
This code expires at {{{expires_at}}}.
{{/if}}
If you didn't request this code, you can safely ignore this email.
"#;

const PASSWORD_RESET_HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Reset your password</title>
</head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h1 style="color: #1a1a1a; margin-bottom: 24px;">Reset your password</h1>
    {{#if name}}<p>Hi {{name}},</p>{{/if}}
    <p>We received a request to reset your password. Click the button below to choose a new one:</p>
    <p style="margin: 32px 0;">
        <a href="{{reset_url}}" style="background-color: #dc2626; color: white; padding: 12px 24px; text-decoration: none; border-radius: 6px; display: inline-block;">Reset password</a>
    </p>
    {{#if code}}<p>Or enter this code: <strong>{{code}}</strong></p>{{/if}}
    {{#if expires_in_minutes}}<p style="color: #666; font-size: 14px;">This link expires in {{expires_in_minutes}} minutes.</p>{{/if}}
    <p style="color: #666; font-size: 14px;">If you didn't request a password reset, you can safely ignore this email.</p>
</body>
</html>"#;

const PASSWORD_RESET_TEXT_TEMPLATE: &str = r#"Reset your password
{{#if name}}
Hi {{{name}}},
{{/if}}
We received a request to reset your password. Open the link below to choose a new one:

{{{reset_url}}}
{{#if code}}
Or enter this code: {{{code}}}
{{/if}}
{{#if expires_in_minutes}}
This link expires in {{{expires_in_minutes}}} minutes.
{{/if}}
If you didn't request a password reset, you can safely ignore this email.
"#;

const INVITE_HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>You've been invited</title>
</head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h1 style="color: #1a1a1a; margin-bottom: 24px;">You've been invited</h1>
    <p>{{#if inviter_name}}{{inviter_name}} has invited you{{else}}You have been invited{{/if}} to join {{#if organization}}{{organization}}{{else}}their workspace{{/if}}.</p>
    <p style="margin: 32px 0;">
        <a href="{{invite_url}}" style="background-color: #2563eb; color: white; padding: 12px 24px; text-decoration: none; border-radius: 6px; display: inline-block;">Accept invitation</a>
    </p>
    {{#if message}}<blockquote style="border-left: 4px solid #e5e7eb; margin: 0; padding-left: 16px; color: #555;">{{message}}</blockquote>{{/if}}
</body>
</html>"#;

const INVITE_TEXT_TEMPLATE: &str = r#"You've been invited

{{#if inviter_name}}{{{inviter_name}}} has invited you{{else}}You have been invited{{/if}} to join {{#if organization}}{{{organization}}}{{else}}their workspace{{/if}}.

Accept the invitation: {{{invite_url}}}
{{#if message}}

"{{{message}}}"
{{/if}}
"#;
