//! Tool vocabulary exposed to the speech model
//!
//! Calls arrive as a name plus a JSON argument string. They are decoded into
//! a closed [`ToolCommand`] and executed against the state machine; every
//! command yields a JSON result that is echoed back to the model.

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use voice_qualifier_core::{CallState, FsmEngine};

pub const UPDATE_LEAD_FIELDS: &str = "update_lead_fields";
pub const CHANGE_STATE: &str = "change_state";
pub const REGISTER_OBJECTION: &str = "register_objection";
pub const SCHEDULE_MEETING: &str = "schedule_meeting";
pub const END_CALL: &str = "end_call";

/// A decoded tool call
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCommand {
    /// Extracted lead fields; `None` values are dropped on execution
    UpdateLeadFields(BTreeMap<String, Option<String>>),
    ChangeState {
        new_state: String,
        reason: Option<String>,
    },
    RegisterObjection {
        objection: String,
    },
    ScheduleMeeting {
        date: String,
        time: String,
    },
    EndCall {
        reason: String,
    },
    /// Unknown name or undecodable arguments
    Unknown {
        name: String,
        error: String,
    },
}

#[derive(Deserialize)]
struct ChangeStateArgs {
    new_state: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct ObjectionArgs {
    objection: String,
}

#[derive(Deserialize)]
struct ScheduleArgs {
    date: String,
    time: String,
}

#[derive(Deserialize)]
struct EndCallArgs {
    #[serde(default)]
    reason: Option<String>,
}

/// Render a model-supplied JSON value as a field string
fn field_value(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Bool(true) => Some("sim".to_string()),
        Value::Bool(false) => Some("não".to_string()),
        other => Some(other.to_string()),
    }
}

impl ToolCommand {
    /// Decode a call; never fails
    pub fn parse(name: &str, arguments: &str) -> Self {
        let arguments = if arguments.trim().is_empty() {
            "{}"
        } else {
            arguments
        };
        let decoded = match name {
            UPDATE_LEAD_FIELDS => serde_json::from_str::<serde_json::Map<String, Value>>(arguments)
                .map(|map| {
                    ToolCommand::UpdateLeadFields(
                        map.into_iter().map(|(k, v)| (k, field_value(v))).collect(),
                    )
                }),
            CHANGE_STATE => serde_json::from_str::<ChangeStateArgs>(arguments).map(|a| {
                ToolCommand::ChangeState {
                    new_state: a.new_state,
                    reason: a.reason,
                }
            }),
            REGISTER_OBJECTION => serde_json::from_str::<ObjectionArgs>(arguments)
                .map(|a| ToolCommand::RegisterObjection {
                    objection: a.objection,
                }),
            SCHEDULE_MEETING => serde_json::from_str::<ScheduleArgs>(arguments).map(|a| {
                ToolCommand::ScheduleMeeting {
                    date: a.date,
                    time: a.time,
                }
            }),
            END_CALL => serde_json::from_str::<EndCallArgs>(arguments).map(|a| {
                ToolCommand::EndCall {
                    reason: a
                        .reason
                        .filter(|r| !r.trim().is_empty())
                        .unwrap_or_else(|| "encerramento normal".to_string()),
                }
            }),
            other => {
                return ToolCommand::Unknown {
                    name: other.to_string(),
                    error: format!("Função desconhecida: {}", other),
                }
            }
        };

        decoded.unwrap_or_else(|e| ToolCommand::Unknown {
            name: name.to_string(),
            error: format!("Argumentos inválidos: {}", e),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            ToolCommand::UpdateLeadFields(_) => UPDATE_LEAD_FIELDS,
            ToolCommand::ChangeState { .. } => CHANGE_STATE,
            ToolCommand::RegisterObjection { .. } => REGISTER_OBJECTION,
            ToolCommand::ScheduleMeeting { .. } => SCHEDULE_MEETING,
            ToolCommand::EndCall { .. } => END_CALL,
            ToolCommand::Unknown { name, .. } => name,
        }
    }

    /// Run the command against the state machine
    pub fn execute(self, engine: &mut FsmEngine) -> ToolOutcome {
        match self {
            ToolCommand::UpdateLeadFields(fields) => {
                let stored = engine.update_fields(fields);
                let collected: Vec<&String> = engine.session().collected_fields.keys().collect();
                tracing::debug!(
                    call_id = %engine.session().call_id,
                    stored = ?stored,
                    "Lead fields updated"
                );
                ToolOutcome::reply(json!({ "success": true, "collected": collected }))
            }
            ToolCommand::ChangeState { new_state, reason } => {
                let target = match new_state.parse::<CallState>() {
                    Ok(target) => target,
                    Err(_) => {
                        return ToolOutcome::reply(json!({
                            "success": false,
                            "error": format!("Estado inválido: {}", new_state),
                        }))
                    }
                };
                let from = engine.state();
                match engine.transition(target, reason.as_deref()) {
                    Ok(_) => {
                        if target == CallState::WarmTransfer {
                            if let Some(reason) = reason.as_deref() {
                                engine.set_handoff_reason(reason);
                            }
                        }
                        ToolOutcome::reply(json!({
                            "success": true,
                            "transitioned": format!("{} → {}", from, target),
                        }))
                    }
                    Err(e) => ToolOutcome::reply(json!({
                        "success": false,
                        "error": e.to_string(),
                        "current_state": from.as_str(),
                    })),
                }
            }
            ToolCommand::RegisterObjection { objection } => {
                engine.add_objection(&objection);
                ToolOutcome::reply(json!({
                    "success": true,
                    "objections": engine.session().objections,
                }))
            }
            ToolCommand::ScheduleMeeting { date, time } => {
                engine.update_fields([
                    ("data_agendamento", Some(date.clone())),
                    ("hora_agendamento", Some(time.clone())),
                ]);
                let scheduled = engine.state() == CallState::Schedule
                    || engine.transition(CallState::Schedule, Some(SCHEDULE_MEETING)).is_ok();
                let mut result = json!({
                    "success": scheduled,
                    "scheduled": format!("{} às {}", date, time),
                });
                if !scheduled {
                    result["error"] = json!(format!(
                        "Não é possível agendar a partir de {}",
                        engine.state()
                    ));
                }
                ToolOutcome::reply(result)
            }
            ToolCommand::EndCall { reason } => {
                // Handoff states keep their classification; anything else closes.
                let state = engine.state();
                if !matches!(
                    state,
                    CallState::Schedule | CallState::WarmTransfer | CallState::FollowUp
                ) && state != CallState::Close
                {
                    let _ = engine.transition(CallState::Close, Some(&reason));
                }
                tracing::info!(
                    call_id = %engine.session().call_id,
                    reason = %reason,
                    "Agent ended the call"
                );
                ToolOutcome {
                    output: json!({ "success": true, "ending": reason }),
                    ends_call: true,
                }
            }
            ToolCommand::Unknown { name, error } => {
                tracing::warn!(tool = %name, error = %error, "Unrecognized tool call");
                ToolOutcome::reply(json!({ "success": false, "error": error }))
            }
        }
    }
}

/// Result of executing a tool call
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    /// Sent back to the model as the function output
    pub output: Value,
    /// The relay should wind down after the grace period
    pub ends_call: bool,
}

impl ToolOutcome {
    fn reply(output: Value) -> Self {
        Self {
            output,
            ends_call: false,
        }
    }
}

/// Function schemas for the realtime session
pub fn tool_definitions() -> Vec<Value> {
    let state_names: Vec<&str> = CallState::ALL.iter().map(|s| s.as_str()).collect();
    vec![
        json!({
            "type": "function",
            "name": UPDATE_LEAD_FIELDS,
            "description": "Atualizar dados coletados do lead. Chame sempre que extrair informações da conversa.",
            "parameters": {
                "type": "object",
                "properties": {
                    "confirmed_interest": { "type": "string", "description": "Lead confirmou interesse? (sim/não)" },
                    "objetivo": { "type": "string", "description": "Objetivo do lead com o curso" },
                    "prazo": { "type": "string", "description": "Prazo para começar (ex: mês que vem, 3 meses)" },
                    "disponibilidade": { "type": "string", "description": "Disponibilidade de horário do lead" },
                    "forma_pagamento": { "type": "string", "description": "Preferência de pagamento" },
                    "formacao": { "type": "string", "description": "Formação acadêmica do lead" },
                    "atuacao": { "type": "string", "description": "Onde o lead trabalha hoje" },
                    "motivacao": { "type": "string", "description": "O que o lead busca no curso" }
                }
            }
        }),
        json!({
            "type": "function",
            "name": CHANGE_STATE,
            "description": "Mudar o estado da conversa quando avançar no fluxo.",
            "parameters": {
                "type": "object",
                "properties": {
                    "new_state": { "type": "string", "enum": state_names, "description": "Novo estado da conversa" },
                    "reason": { "type": "string", "description": "Motivo da mudança de estado" }
                },
                "required": ["new_state"]
            }
        }),
        json!({
            "type": "function",
            "name": REGISTER_OBJECTION,
            "description": "Registrar quando o lead expressar uma objeção.",
            "parameters": {
                "type": "object",
                "properties": {
                    "objection": { "type": "string", "description": "Objeção expressa pelo lead (ex: preço alto, sem tempo)" }
                },
                "required": ["objection"]
            }
        }),
        json!({
            "type": "function",
            "name": SCHEDULE_MEETING,
            "description": "Agendar reunião quando o lead aceitar.",
            "parameters": {
                "type": "object",
                "properties": {
                    "date": { "type": "string", "description": "Data combinada (DD/MM/AAAA)" },
                    "time": { "type": "string", "description": "Hora combinada (HH:MM)" }
                },
                "required": ["date", "time"]
            }
        }),
        json!({
            "type": "function",
            "name": END_CALL,
            "description": "Encerrar a chamada. Use APENAS depois de se despedir.",
            "parameters": {
                "type": "object",
                "properties": {
                    "reason": { "type": "string", "description": "Motivo (despedida, lead desligou, ocupado)" }
                },
                "required": ["reason"]
            }
        }),
    ]
}
