use anyhow::{Context, anyhow};
use pixels::{Pixels, SurfaceTexture};
use std::time::{Duration, Instant};
use tracing::{error, info};
use winit::{
    dpi::LogicalSize,
    event::{ElementState, Event, KeyboardInput, VirtualKeyCode, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    window::WindowBuilder,
};

use crate::config::EnvConfig;
use crate::dqn::DqnAgent;
use crate::game::{Action, Game, GameView};
use crate::snake::Direction;

/// every cell is SCALE x SCALE on screen
const SCALE: u32 = 20;
const TICK: Duration = Duration::from_millis(100); // 10 steps per second

const BACKGROUND: [u8; 4] = [0x10, 0x10, 0x10, 0xFF];
const FOOD: [u8; 4] = [0xE0, 0x30, 0x30, 0xFF];
const BODY: [u8; 4] = [0x30, 0xC0, 0x30, 0xFF];
const HEAD: [u8; 4] = [0xA0, 0xFF, 0x60, 0xFF];

/// Who moves the snake.
pub enum Controller {
    Human,
    Agent(Box<DqnAgent>),
}

/// Game plus who drives it; independent of the window so it can be tested headless.
pub struct Session {
    game: Game,
    controller: Controller,
    started: bool,
}

impl Session {
    pub fn new(env_cfg: &EnvConfig, controller: Controller) -> Self {
        // the agent starts right away, a human presses Space
        let started = matches!(controller, Controller::Agent(_));
        Self { game: Game::new(env_cfg), controller, started }
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    #[cfg(test)]
    pub fn started(&self) -> bool {
        self.started
    }

    /// One environment step. Agent failures end the episode instead of the program.
    pub fn tick(&mut self) {
        if !self.started || self.game.game_over() {
            return;
        }
        match &self.controller {
            Controller::Human => {
                self.game.step(None);
            }
            Controller::Agent(agent) => match agent.greedy(&self.game.state()) {
                Ok(action) => {
                    self.game.step(Action::from_index(action));
                }
                Err(e) => {
                    error!("agent failed to act: {}; ending this game", e);
                    self.game.force_game_over();
                }
            },
        }
        if self.game.game_over() {
            info!("game over, score {}", self.game.score());
        }
    }

    pub fn key(&mut self, key: VirtualKeyCode) {
        let requested = match key {
            VirtualKeyCode::Up => Some(Direction::Up),
            VirtualKeyCode::Down => Some(Direction::Down),
            VirtualKeyCode::Left => Some(Direction::Left),
            VirtualKeyCode::Right => Some(Direction::Right),
            _ => None,
        };
        if let Some(dir) = requested {
            if matches!(self.controller, Controller::Human) && !self.game.game_over() {
                self.game.set_direction(dir);
            }
            return;
        }
        match key {
            VirtualKeyCode::Space => self.started = true,
            VirtualKeyCode::R if self.game.game_over() => {
                self.game.reset();
                self.started = matches!(self.controller, Controller::Agent(_));
            }
            _ => {}
        }
    }
}

/// Opens the window and plays until it is closed. Does not return on success.
pub fn run(env_cfg: EnvConfig, controller: Controller) -> anyhow::Result<()> {
    let (width, height) = (env_cfg.grid_width as u32, env_cfg.grid_height as u32);
    let event_loop = EventLoop::new();

    let title = match controller {
        Controller::Human => "Snake",
        Controller::Agent(_) => "Snake - DQN agent",
    };
    let window = WindowBuilder::new()
        .with_title(title)
        .with_inner_size(LogicalSize::new(width * SCALE, height * SCALE))
        .with_resizable(false)
        .build(&event_loop)
        .context("could not create window")?;

    // one pixel per cell, stretched by the surface
    let size = window.inner_size();
    let surface = SurfaceTexture::new(size.width, size.height, &window);
    let mut pixels = Pixels::new(width, height, surface).map_err(|e| anyhow!("pixels init failed: {e}"))?;

    let mut session = Session::new(&env_cfg, controller);
    let mut last_tick = Instant::now();
    info!("arrows steer, Space starts, R restarts, Esc quits");

    event_loop.run(move |event, _, control_flow| {
        match event {
            Event::RedrawRequested(_) => {
                draw(pixels.frame_mut(), &session.game().snapshot());
                if let Err(e) = pixels.render() {
                    error!("render failed: {}", e);
                    *control_flow = ControlFlow::Exit;
                }
            }

            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => *control_flow = ControlFlow::Exit,
                WindowEvent::KeyboardInput {
                    input: KeyboardInput { state: ElementState::Pressed, virtual_keycode: Some(key), .. },
                    ..
                } => {
                    if key == VirtualKeyCode::Escape {
                        *control_flow = ControlFlow::Exit;
                    } else {
                        session.key(key);
                        window.request_redraw();
                    }
                }
                _ => {}
            },

            Event::MainEventsCleared => {
                if last_tick.elapsed() >= TICK {
                    session.tick();
                    last_tick = Instant::now();
                    window.request_redraw();
                }
                if *control_flow != ControlFlow::Exit {
                    *control_flow = ControlFlow::WaitUntil(last_tick + TICK);
                }
            }
            _ => {}
        }
    });
}

/// Paints the board into an RGBA frame of `width * height` pixels.
pub fn draw(frame: &mut [u8], view: &GameView) {
    for pixel in frame.chunks_exact_mut(4) {
        pixel.copy_from_slice(&BACKGROUND);
    }

    let mut put = |x: i32, y: i32, color: &[u8; 4]| {
        if x < 0 || y < 0 || x >= view.width || y >= view.height {
            return;
        }
        let i = ((y * view.width + x) * 4) as usize;
        if i + 4 <= frame.len() {
            frame[i..i + 4].copy_from_slice(color);
        }
    };

    if let Some(food) = view.food {
        put(food.x, food.y, &FOOD);
    }
    for (i, seg) in view.snake.iter().enumerate() {
        put(seg.x, seg.y, if i == 0 { &HEAD } else { &BODY });
    }
}
