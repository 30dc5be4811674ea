//! Relay actor task.

use super::endpoint::{Endpoint, EndpointList};
use super::{RelayContext, RelayState};
use crate::channel::{ChannelEvent, ChannelTimings, ControlChannel};
use crate::config::Credentials;
use crate::error::{RelayError, Result};
use crate::protocol::{
    Hello, Identified, Identify, MessageResult, MessageToRelay, MessageToStreamer, Request,
    RequestData, ResponseData, StartTunnelRequest, StartTunnelResponse, StatusResponse,
};
use crate::status::{RelayFlags, RelayStatus};
use crate::tunnel::{TunnelSession, resolve_address};
use moblink_transport::{Network, SocketFactory};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Everything the relay task reacts to.
///
/// Events from channels, tunnels and timers carry the generation they were
/// created with; events from a replaced generation are dropped.
pub(super) enum Command {
    Configure {
        credentials: Credentials,
        endpoints: Vec<Endpoint>,
    },
    Start,
    Stop,
    AddEndpoint(Endpoint),
    SetDataPlaneNetwork(Option<Network>),
    EndpointIndex(oneshot::Sender<usize>),
    Channel {
        generation: u64,
        event: ChannelEvent,
    },
    TunnelOpened {
        generation: u64,
        request_id: u32,
        result: Result<TunnelSession>,
    },
    TunnelFailed {
        generation: u64,
        error: RelayError,
    },
    ReconnectTimer {
        generation: u64,
    },
    WrongPasswordTimeout {
        generation: u64,
    },
}

pub(super) struct RelayActor {
    context: RelayContext,
    commands: mpsc::WeakUnboundedSender<Command>,
    state_tx: watch::Sender<RelayState>,
    status_tx: watch::Sender<RelayStatus>,

    credentials: Credentials,
    endpoints: EndpointList,
    data_plane: Option<Network>,
    started: bool,
    connected: bool,
    wrong_password: bool,

    channel: Option<ControlChannel>,
    channel_generation: u64,
    tunnel: Option<TunnelSession>,
    tunnel_opening: Option<JoinHandle<()>>,
    tunnel_generation: u64,
    reconnect_timer: Option<JoinHandle<()>>,
    timer_generation: u64,
}

impl RelayActor {
    pub(super) fn new(
        context: RelayContext,
        commands: mpsc::WeakUnboundedSender<Command>,
        state_tx: watch::Sender<RelayState>,
        status_tx: watch::Sender<RelayStatus>,
    ) -> Self {
        Self {
            context,
            commands,
            state_tx,
            status_tx,
            credentials: Credentials::default(),
            endpoints: EndpointList::default(),
            data_plane: None,
            started: false,
            connected: false,
            wrong_password: false,
            channel: None,
            channel_generation: 0,
            tunnel: None,
            tunnel_opening: None,
            tunnel_generation: 0,
            reconnect_timer: None,
            timer_generation: 0,
        }
    }

    pub(super) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            self.handle(command).await;
            self.publish_status();
        }

        self.started = false;
        self.cancel_reconnect_timer();
        self.stop_internal().await;
        tracing::debug!(url = %self.endpoints.current_url(), "Relay task exiting");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Configure {
                credentials,
                endpoints,
            } => {
                self.credentials = credentials;
                self.endpoints = EndpointList::new(endpoints);
                tracing::info!(
                    url = %self.endpoints.current_url(),
                    "Configured with {} endpoint(s)",
                    self.endpoints.len()
                );
            }
            Command::Start => {
                tracing::info!(url = %self.endpoints.current_url(), "Start");
                if !self.started {
                    self.started = true;
                    self.start_internal().await;
                }
            }
            Command::Stop => {
                tracing::info!(url = %self.endpoints.current_url(), "Stop");
                self.cancel_reconnect_timer();
                if self.started {
                    self.started = false;
                    self.stop_internal().await;
                }
                self.set_state(RelayState::Idle);
            }
            Command::AddEndpoint(endpoint) => {
                let url = endpoint.url.clone();
                if self.endpoints.add(endpoint) {
                    tracing::info!(
                        url = %self.endpoints.current_url(),
                        "Added streamer endpoint {}",
                        url
                    );
                }
            }
            Command::SetDataPlaneNetwork(network) => self.set_data_plane_network(network).await,
            Command::EndpointIndex(reply) => {
                let _ = reply.send(self.endpoints.index());
            }
            Command::Channel { generation, event } => {
                if generation != self.channel_generation || self.channel.is_none() {
                    tracing::trace!("Dropping event from old channel");
                    return;
                }
                self.handle_channel_event(event).await;
            }
            Command::TunnelOpened {
                generation,
                request_id,
                result,
            } => {
                if generation != self.tunnel_generation {
                    tracing::trace!("Dropping tunnel from old request");
                    return;
                }
                self.tunnel_opening = None;
                match result {
                    Ok(tunnel) => {
                        let port = tunnel.source_port();
                        self.tunnel = Some(tunnel);
                        self.send(&MessageToStreamer::ok_response(
                            request_id,
                            ResponseData::StartTunnel(StartTunnelResponse { port }),
                        ));
                    }
                    Err(e) => self.reconnect_soon(e).await,
                }
            }
            Command::TunnelFailed { generation, error } => {
                if generation == self.tunnel_generation {
                    self.reconnect_soon(error).await;
                }
            }
            Command::ReconnectTimer { generation } => {
                if generation != self.timer_generation {
                    return;
                }
                self.reconnect_timer = None;
                self.start_internal().await;
            }
            Command::WrongPasswordTimeout { generation } => {
                if generation == self.channel_generation && self.wrong_password {
                    self.reconnect_soon(RelayError::WrongPassword).await;
                }
            }
        }
    }

    async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Opened => self.set_state(RelayState::AwaitingChallenge),
            ChannelEvent::Message(text) => self.handle_message(&text).await,
            ChannelEvent::Closed(reason) => self.reconnect_soon(reason).await,
        }
    }

    async fn handle_message(&mut self, text: &str) {
        let message = match MessageToRelay::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                self.reconnect_soon(e.into()).await;
                return;
            }
        };

        match message {
            MessageToRelay::Hello(hello) => self.handle_hello(&hello),
            MessageToRelay::Identified(identified) => self.handle_identified(identified),
            MessageToRelay::Request(request) => self.handle_request(request).await,
        }
    }

    fn handle_hello(&self, hello: &Hello) {
        tracing::debug!(
            url = %self.endpoints.current_url(),
            "Got hello (api version {})",
            hello.api_version
        );
        let authentication = moblink_crypto::auth_token(
            &self.credentials.password,
            &hello.authentication.salt,
            &hello.authentication.challenge,
        );
        self.send(&MessageToStreamer::Identify(Identify {
            id: self.credentials.relay_id.clone(),
            name: self.credentials.name.clone(),
            authentication,
        }));
        self.set_state(RelayState::Identifying);
    }

    fn handle_identified(&mut self, identified: Identified) {
        match identified.result {
            MessageResult::Ok(_) => {
                tracing::info!(url = %self.endpoints.current_url(), "Identified");
                self.connected = true;
                self.wrong_password = false;
                self.set_state(RelayState::Connected);
            }
            MessageResult::WrongPassword(_) => {
                tracing::warn!(url = %self.endpoints.current_url(), "Wrong password");
                self.connected = false;
                self.wrong_password = true;
                self.set_state(RelayState::WrongPassword);
                self.schedule_wrong_password_timeout();
            }
        }
    }

    async fn handle_request(&mut self, request: Request) {
        if !self.connected {
            tracing::debug!(
                url = %self.endpoints.current_url(),
                "Ignoring request {} before identification",
                request.id
            );
            return;
        }

        match request.data {
            RequestData::StartTunnel(start) => self.handle_start_tunnel(request.id, start).await,
            RequestData::Status(_) => {
                let snapshot = self.context.status_source.snapshot();
                self.send(&MessageToStreamer::ok_response(
                    request.id,
                    ResponseData::Status(StatusResponse {
                        battery_percentage: snapshot.battery_percentage,
                        thermal_state: snapshot.thermal_state,
                    }),
                ));
            }
        }
    }

    async fn handle_start_tunnel(&mut self, request_id: u32, start: StartTunnelRequest) {
        tracing::info!(
            url = %self.endpoints.current_url(),
            "Got start tunnel to {}:{}",
            start.address,
            start.port
        );
        self.close_tunnel().await;

        let Some(data_plane) = self.data_plane.clone() else {
            self.reconnect_soon(RelayError::NoDataPlaneNetwork).await;
            return;
        };

        let generation = self.tunnel_generation;
        let source_network = self.endpoints.current().and_then(|e| e.network.clone());
        let factory = self.context.socket_factory.clone();
        let recv_timeout = self.context.timings.destination_recv_timeout;
        let commands = self.commands.clone();

        self.tunnel_opening = Some(tokio::spawn(async move {
            let failures = commands.clone();
            let on_error = move |error| {
                if let Some(tx) = failures.upgrade() {
                    let _ = tx.send(Command::TunnelFailed { generation, error });
                }
            };

            let result = open_tunnel(
                factory.as_ref(),
                &start,
                source_network.as_ref(),
                &data_plane,
                recv_timeout,
                on_error,
            )
            .await;

            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::TunnelOpened {
                    generation,
                    request_id,
                    result,
                });
            }
        }));
    }

    async fn set_data_plane_network(&mut self, network: Option<Network>) {
        match &network {
            Some(network) => tracing::info!(
                url = %self.endpoints.current_url(),
                "Destination network {}",
                network
            ),
            None => tracing::info!(url = %self.endpoints.current_url(), "Destination network lost"),
        }
        self.data_plane = network;
        if self.tunnel.is_some() || self.tunnel_opening.is_some() {
            self.reconnect_soon(RelayError::DataPlaneNetworkChanged).await;
        }
    }

    async fn start_internal(&mut self) {
        self.stop_internal().await;
        if !self.started {
            return;
        }

        let Some(endpoint) = self.endpoints.current().cloned() else {
            tracing::debug!("No streamer endpoint");
            self.set_state(RelayState::Disconnected);
            return;
        };

        self.channel_generation += 1;
        let generation = self.channel_generation;
        let commands = self.commands.clone();
        let timings = ChannelTimings {
            connect_timeout: self.context.timings.connect_timeout,
            keepalive_interval: self.context.timings.keepalive_interval,
        };

        tracing::info!(url = %endpoint.url, "Connecting");
        match ControlChannel::open(
            &endpoint,
            self.context.socket_factory.clone(),
            timings,
            move |event| {
                if let Some(tx) = commands.upgrade() {
                    let _ = tx.send(Command::Channel { generation, event });
                }
            },
        ) {
            Ok(channel) => {
                self.channel = Some(channel);
                self.set_state(RelayState::Connecting);
            }
            Err(e) => {
                tracing::warn!(
                    url = %endpoint.url,
                    index = self.endpoints.index(),
                    "Unusable streamer endpoint: {}",
                    e
                );
                self.set_state(RelayState::Disconnected);
                if self.endpoints.advance() {
                    self.schedule_reconnect();
                }
            }
        }
    }

    async fn stop_internal(&mut self) {
        if self.channel.take().is_some() {
            tracing::debug!(url = %self.endpoints.current_url(), "Closed control channel");
        }
        self.channel_generation += 1;
        self.connected = false;
        self.wrong_password = false;
        self.close_tunnel().await;
    }

    async fn close_tunnel(&mut self) {
        self.tunnel_generation += 1;
        if let Some(task) = self.tunnel_opening.take() {
            task.abort();
            let _ = task.await;
        }
        if let Some(tunnel) = self.tunnel.take() {
            tunnel.close().await;
        }
    }

    async fn reconnect_soon(&mut self, reason: RelayError) {
        tracing::warn!(
            url = %self.endpoints.current_url(),
            "Reconnect soon with reason: {}",
            reason
        );
        self.stop_internal().await;
        if self.endpoints.advance() {
            tracing::info!(
                url = %self.endpoints.current_url(),
                "Advancing to next streamer endpoint"
            );
        }
        self.set_state(RelayState::Disconnected);
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        self.cancel_reconnect_timer();
        let generation = self.timer_generation;
        let delay = self.context.timings.reconnect_delay;
        let commands = self.commands.clone();
        self.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::ReconnectTimer { generation });
            }
        }));
    }

    fn cancel_reconnect_timer(&mut self) {
        self.timer_generation += 1;
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    fn schedule_wrong_password_timeout(&self) {
        let Some(delay) = self.context.timings.wrong_password_timeout else {
            return;
        };
        let generation = self.channel_generation;
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::WrongPasswordTimeout { generation });
            }
        });
    }

    fn send(&self, message: &MessageToStreamer) {
        let Some(channel) = &self.channel else {
            return;
        };
        match message.to_json() {
            Ok(text) => channel.send(text),
            Err(e) => tracing::warn!("Failed to encode message: {}", e),
        }
    }

    fn set_state(&self, state: RelayState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::debug!(
                url = %self.endpoints.current_url(),
                "State {} -> {}",
                current,
                state
            );
            *current = state;
            true
        });
    }

    fn publish_status(&self) {
        let status = RelayStatus::evaluate(&RelayFlags {
            url: self.endpoints.current_url(),
            password: &self.credentials.password,
            data_plane_available: self.data_plane.is_some(),
            connected: self.connected,
            wrong_password: self.wrong_password,
            started: self.started,
        });
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            tracing::info!(url = %self.endpoints.current_url(), "Status: {}", status);
            *current = status;
            true
        });
    }
}

async fn open_tunnel<F>(
    factory: &dyn SocketFactory,
    start: &StartTunnelRequest,
    source_network: Option<&Network>,
    data_plane: &Network,
    recv_timeout: Duration,
    on_error: F,
) -> Result<TunnelSession>
where
    F: Fn(RelayError) + Send + Sync + 'static,
{
    let destination = resolve_address(&start.address, start.port, Some(data_plane.address)).await?;
    TunnelSession::open(
        factory,
        source_network,
        data_plane,
        destination,
        recv_timeout,
        on_error,
    )
    .await
}
