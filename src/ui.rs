//! TUI prompt surface
//!
//! The surface stays hidden until the global hotkey fires, then shows a
//! prompt bar with the running transcript above it. A single-threaded 50ms
//! loop drains the hotkey signal and stream progress each tick; all agent
//! work happens in background workers, never here.

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Paragraph, Wrap},
};
use std::io;
use std::time::Duration;

use crate::agent::Prompt;
use crate::coordinator::{Coordinator, TurnEvent};
use crate::features::{SENTINEL_CUSTOMIZE, SENTINEL_MAXIMIZE};

/// Surface visibility, toggled by the hotkey
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Surface {
    Hidden,
    Prompt,
    Maximized,
}

struct UiState {
    surface: Surface,
    input: String,
    output: Vec<String>,
    is_streaming: bool,
    tick: usize,
    status: String,
}

impl UiState {
    fn new(hotkey: &str, hotkey_active: bool) -> Self {
        let status = if hotkey_active {
            format!("Press {} anywhere to summon the prompt", hotkey)
        } else {
            "Global hotkey unavailable; use this window directly".into()
        };
        Self {
            surface: Surface::Prompt,
            input: String::new(),
            output: vec!["Ask anything and press Enter.".into()],
            is_streaming: false,
            tick: 0,
            status,
        }
    }
}

/// Run the prompt surface until the user quits
pub async fn run(mut coordinator: Coordinator) -> Result<()> {
    let mut terminal = setup_terminal()?;
    let result = run_loop(&mut terminal, &mut coordinator).await;
    restore_terminal(terminal)?;
    result
}

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    coordinator: &mut Coordinator,
) -> Result<()> {
    let hotkey_active = coordinator.register_hotkey();
    let mut state = UiState::new(&coordinator.config().hotkey.clone(), hotkey_active);

    coordinator.probe_host().await;

    loop {
        state.tick += 1;

        // Hotkey summons (or re-focuses) the surface
        if coordinator.take_hotkey_signal() && state.surface == Surface::Hidden {
            state.surface = Surface::Prompt;
        }

        // Stream progress
        for event in coordinator.poll().await {
            apply_turn_event(&mut state, event);
        }

        if state.surface != Surface::Hidden {
            terminal.draw(|f| render(f, &state, coordinator.agent_name()))?;
        }

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }

                match key.code {
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        let _ = coordinator.cancel_active().await;
                        break;
                    }
                    // Esc stops a running stream first, then hides
                    KeyCode::Esc => {
                        if state.is_streaming {
                            for event in coordinator.cancel_active().await {
                                apply_turn_event(&mut state, event);
                            }
                            state.is_streaming = false;
                        } else if state.surface == Surface::Hidden {
                            break;
                        } else {
                            state.surface = Surface::Hidden;
                        }
                    }
                    KeyCode::Char('n') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        coordinator.start_new_session();
                        state.output = vec!["New session.".into()];
                    }
                    KeyCode::Char('m') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        run_feature(coordinator, &mut state, "maximize_chat");
                    }
                    KeyCode::Char('w') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        run_feature(coordinator, &mut state, "web_search");
                    }
                    KeyCode::Enter => {
                        let text = state.input.trim().to_string();
                        if !text.is_empty() {
                            state.input.clear();
                            // Finish rendering any superseded turn before the
                            // new answer gets its output line
                            for event in coordinator.submit(Prompt::new(text.clone())).await {
                                apply_turn_event(&mut state, event);
                            }
                            state.output.push(format!("> {}", text));
                            state.output.push(String::new());
                            state.is_streaming = true;
                        }
                    }
                    KeyCode::Char(c) => {
                        state.input.push(c);
                    }
                    KeyCode::Backspace => {
                        state.input.pop();
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(())
}

/// Fold one turn event into the transcript view
fn apply_turn_event(state: &mut UiState, event: TurnEvent) {
    match event {
        TurnEvent::Token(t) => {
            if let Some(last) = state.output.last_mut() {
                last.push_str(&t);
            }
        }
        TurnEvent::Complete { .. } => {
            state.is_streaming = false;
        }
        TurnEvent::Error { message, cancelled } => {
            state.is_streaming = false;
            if cancelled {
                state.output.push("[stopped]".into());
            } else {
                state.output.push(format!("[error: {}]", message));
            }
        }
    }
}

/// Execute a feature with the current input as context and interpret the
/// display sentinels it may return
fn run_feature(coordinator: &Coordinator, state: &mut UiState, name: &str) {
    match coordinator.execute_feature(name, &state.input) {
        Ok(result) => match result.as_str() {
            SENTINEL_MAXIMIZE => state.surface = Surface::Maximized,
            SENTINEL_CUSTOMIZE => state.status = "Customize: edit config.json and restart".into(),
            other => state.status = other.to_string(),
        },
        Err(e) => state.status = format!("Feature failed: {}", e),
    }
}

fn render(f: &mut Frame, state: &UiState, agent: &str) {
    let area = f.size();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(5),
            Constraint::Length(3),
            Constraint::Length(1),
        ])
        .split(area);

    // Transcript
    let text: String = state.output.join("\n");
    let chat = Paragraph::new(text)
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("prompt-anywhere | {}", agent)),
        );
    f.render_widget(chat, chunks[0]);

    // Prompt bar
    let input_title = if state.is_streaming {
        format!("{} streaming (Esc to stop)", spinner_char(state.tick))
    } else {
        "Ask (Enter to send)".into()
    };
    let input_style = if state.is_streaming {
        Style::default().fg(Color::DarkGray)
    } else {
        Style::default()
    };
    let input = Paragraph::new(state.input.as_str())
        .style(input_style)
        .block(Block::default().borders(Borders::ALL).title(input_title));
    f.render_widget(input, chunks[1]);

    // Status bar
    let status = format!(
        " {} | ^N new ^W search ^M maximize Esc hide ^C quit",
        state.status
    );
    let status = Paragraph::new(status).style(Style::default().fg(Color::DarkGray));
    f.render_widget(status, chunks[2]);
}

fn spinner_char(tick: usize) -> char {
    const SPINNER: &[char] = &['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];
    SPINNER[tick % SPINNER.len()]
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Ok(Terminal::new(backend)?)
}

fn restore_terminal(mut terminal: Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
