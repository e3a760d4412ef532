//! DNS server subsystem.
//!
//! A UDP listener that answers A and AAAA questions for container names
//! under the managed zone, using the message types from
//! [hickory-dns](https://crates.io/crates/hickory-server).  Each datagram is
//! handled on its own task and goes through the same steps:
//!
//! * **Decode**: bytes that are not a DNS query message are dropped.
//! * **Shape check**: messages must carry exactly one question, otherwise
//!   they are dropped without a reply.
//! * **Resolution**: the question is handed to the [`Resolver`].
//! * **Reply**: a NOERROR response carrying zero or one record with a TTL of
//!   0, since the table can change at any moment.
//!
//! Only a UDP socket is ever bound, so every request arrives over the
//! expected transport.

use std::net::SocketAddr;
use std::sync::Arc;

use hickory_server::proto::op::{Message, MessageType, ResponseCode};
use hickory_server::proto::rr::Record;
use log::{debug, info, warn};
use tokio::net::UdpSocket;

use crate::resolver::Resolver;

/// Records are never cached by clients.
const ANSWER_TTL: u32 = 0;

/// Largest datagram read off the socket.
const MAX_DATAGRAM: usize = 4096;

/// Start the DNS server and serve until the socket fails.
pub async fn run_dns_server(bind_addr: SocketAddr, resolver: Resolver) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(bind_addr).await?;
    info!("DNS server listening on {} for *{}", bind_addr, resolver.suffix());
    serve(Arc::new(socket), resolver).await
}

/// Receive loop on an already bound socket.
pub async fn serve(socket: Arc<UdpSocket>, resolver: Resolver) -> anyhow::Result<()> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, src) = socket.recv_from(&mut buf).await?;
        let datagram = buf[..len].to_vec();
        let socket = Arc::clone(&socket);
        let resolver = resolver.clone();

        tokio::spawn(async move {
            let Some(reply) = handle_datagram(&resolver, &datagram, src).await else {
                return;
            };
            if let Err(e) = socket.send_to(&reply, src).await {
                warn!("Failed to send DNS response to {}: {}", src, e);
            }
        });
    }
}

/// Turn one inbound datagram into the bytes of its reply, if it gets one.
async fn handle_datagram(resolver: &Resolver, datagram: &[u8], src: SocketAddr) -> Option<Vec<u8>> {
    let request = match Message::from_vec(datagram) {
        Ok(message) => message,
        Err(e) => {
            debug!("Dropping undecodable datagram from {}: {}", src, e);
            return None;
        }
    };
    if request.message_type() != MessageType::Query {
        debug!("Dropping non-query message from {}", src);
        return None;
    }
    let [query] = request.queries() else {
        debug!(
            "Dropping request from {} with {} questions",
            src,
            request.queries().len()
        );
        return None;
    };

    debug!("Question {} {} from {}", query.query_type(), query.name(), src);
    let answer = resolver
        .resolve(&query.name().to_string(), query.query_type())
        .await
        .map(|rdata| Record::from_rdata(query.name().clone(), ANSWER_TTL, rdata));

    let mut reply = Message::new();
    reply
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_op_code(request.op_code())
        .set_recursion_desired(request.recursion_desired())
        .set_checking_disabled(request.checking_disabled())
        .set_authoritative(true)
        .set_response_code(ResponseCode::NoError)
        .add_query(query.clone());
    if let Some(record) = answer {
        reply.add_answer(record);
    }

    match reply.to_vec() {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!("Failed to encode DNS response for {}: {}", src, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::{endpoint, StaticInspector};
    use crate::state::{AddressTable, StateTracker};
    use crate::types::NetworkEvent;
    use hickory_server::proto::op::{OpCode, Query};
    use hickory_server::proto::rr::rdata::A;
    use hickory_server::proto::rr::{DNSClass, Name, RData, RecordType};
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tokio::time::timeout;

    /// How long a client waits before deciding no reply is coming.
    const NO_REPLY_WAIT: Duration = Duration::from_millis(300);

    fn query(name: &str, record_type: RecordType) -> Query {
        let mut query = Query::new();
        query.set_name(Name::from_ascii(name).unwrap());
        query.set_query_type(record_type);
        query.set_query_class(DNSClass::IN);
        query
    }

    fn query_bytes(id: u16, queries: Vec<Query>) -> Vec<u8> {
        let mut msg = Message::new();
        msg.set_id(id);
        msg.set_message_type(MessageType::Query);
        msg.set_op_code(OpCode::Query);
        msg.set_recursion_desired(true);
        for q in queries {
            msg.add_query(q);
        }
        msg.to_vec().unwrap()
    }

    async fn resolver() -> Resolver {
        let inspector = Arc::new(StaticInspector::default());
        inspector.attach("net1", endpoint("c1", "foo", Some([172, 18, 0, 5])));
        let tracker = StateTracker::new(AddressTable::new(), inspector);
        tracker
            .apply_event(NetworkEvent::Create {
                network_id: "net1".into(),
                name: "backend".into(),
            })
            .await
            .unwrap();
        tracker
            .apply_event(NetworkEvent::Connect {
                network_id: "net1".into(),
                container_id: "c1".into(),
            })
            .await
            .unwrap();
        Resolver::new(tracker.table().clone(), "rt")
    }

    /// Bind a listener on loopback and a client socket talking to it.
    async fn listener() -> UdpSocket {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(serve(Arc::new(server), resolver().await));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(addr).await.unwrap();
        client
    }

    async fn exchange(client: &UdpSocket, datagram: &[u8]) -> Option<Message> {
        client.send(datagram).await.unwrap();
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let len = timeout(NO_REPLY_WAIT, client.recv(&mut buf)).await.ok()?.unwrap();
        Some(Message::from_vec(&buf[..len]).expect("reply parses"))
    }

    #[tokio::test]
    async fn answers_with_zero_ttl_a_record() {
        let client = listener().await;
        let reply = exchange(&client, &query_bytes(4242, vec![query("foo.rt.", RecordType::A)]))
            .await
            .expect("a reply is sent");

        assert_eq!(reply.id(), 4242);
        assert_eq!(reply.message_type(), MessageType::Response);
        assert_eq!(reply.op_code(), OpCode::Query);
        assert!(reply.recursion_desired());
        assert!(reply.authoritative());
        assert_eq!(reply.response_code(), ResponseCode::NoError);
        assert_eq!(reply.queries().len(), 1);
        assert_eq!(reply.answers().len(), 1);
        let record = &reply.answers()[0];
        assert_eq!(record.ttl(), 0);
        assert_eq!(
            record.data(),
            Some(&RData::A(A(Ipv4Addr::new(172, 18, 0, 5))))
        );
    }

    #[tokio::test]
    async fn out_of_zone_gets_empty_reply() {
        let client = listener().await;
        let datagram = query_bytes(1, vec![query("foo.other-suffix.", RecordType::A)]);
        let reply = exchange(&client, &datagram).await.expect("a reply is sent");
        assert_eq!(reply.response_code(), ResponseCode::NoError);
        assert!(reply.answers().is_empty());
    }

    #[tokio::test]
    async fn missing_family_gets_empty_reply() {
        let client = listener().await;
        let datagram = query_bytes(2, vec![query("foo.rt.", RecordType::AAAA)]);
        let reply = exchange(&client, &datagram).await.expect("a reply is sent");
        assert!(reply.answers().is_empty());
    }

    #[tokio::test]
    async fn mixed_case_names_resolve() {
        let client = listener().await;
        let datagram = query_bytes(3, vec![query("FOO.Rt.", RecordType::A)]);
        let reply = exchange(&client, &datagram).await.expect("a reply is sent");
        assert_eq!(reply.answers().len(), 1);
    }

    #[tokio::test]
    async fn two_questions_get_no_reply() {
        let client = listener().await;
        let datagram = query_bytes(
            7,
            vec![query("foo.rt.", RecordType::A), query("foo.rt.", RecordType::AAAA)],
        );
        assert!(exchange(&client, &datagram).await.is_none());
    }

    #[tokio::test]
    async fn zero_questions_get_no_reply() {
        let client = listener().await;
        assert!(exchange(&client, &query_bytes(8, Vec::new())).await.is_none());
    }

    #[tokio::test]
    async fn garbage_gets_no_reply_and_server_keeps_serving() {
        let client = listener().await;
        assert!(exchange(&client, &[0xde, 0xad, 0xbe]).await.is_none());

        let datagram = query_bytes(9, vec![query("foo.rt.", RecordType::A)]);
        assert!(exchange(&client, &datagram).await.is_some());
    }

    #[tokio::test]
    async fn responses_are_not_answered() {
        let client = listener().await;
        let mut msg = Message::from_vec(&query_bytes(10, vec![query("foo.rt.", RecordType::A)]))
            .unwrap();
        msg.set_message_type(MessageType::Response);
        assert!(exchange(&client, &msg.to_vec().unwrap()).await.is_none());
    }
}
