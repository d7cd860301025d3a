use bytes::BytesMut;

use meshbusd_codec::{
    Decoder,
    crypto::generate_password,
    message::{
        MessageEncoder,
        attributes::{
            Data, IceControlling, MessageIntegrity, MessageIntegritySha256, PasswordAlgorithm,
            Priority, UseCandidate, UserName, XorPeerAddress, XorRelayedAddress,
        },
        methods::*,
    },
};

#[test]
fn binding_request_round_trips_without_credentials() {
    let token = *b"abcdefghijkl";
    let mut buf = BytesMut::new();
    let mut encoder = MessageEncoder::new(BINDING_REQUEST, &token, &mut buf);
    encoder.flush(None).unwrap();

    let mut decoder = Decoder::default();
    let message = decoder.decode(&buf).unwrap();

    assert_eq!(message.method(), BINDING_REQUEST);
    assert_eq!(message.transaction_id(), &token);
}

#[test]
fn allocate_request_carries_long_term_credential_and_verifies() {
    let password = generate_password("user1", "secret", "meshbus", PasswordAlgorithm::Md5);
    let token = *b"012345678901";

    let mut buf = BytesMut::new();
    let mut encoder = MessageEncoder::new(ALLOCATE_REQUEST, &token, &mut buf);
    encoder.append::<UserName>("user1");
    encoder.flush(Some(&password)).unwrap();

    let mut decoder = Decoder::default();
    let message = decoder.decode(&buf).unwrap();

    assert_eq!(message.method(), ALLOCATE_REQUEST);
    assert_eq!(message.get::<UserName>(), Some("user1"));
    assert!(message.get::<MessageIntegrity>().is_some());
    assert!(message.get::<MessageIntegritySha256>().is_none());
    message.checksum(&password).unwrap();
}

#[test]
fn send_indication_carries_peer_address_and_payload() {
    let token = *b"send0123send";
    let peer = "203.0.113.9:4242".parse().unwrap();
    let payload = b"hello relay";

    let mut buf = BytesMut::new();
    let mut encoder = MessageEncoder::new(SEND_INDICATION, &token, &mut buf);
    encoder.append::<XorPeerAddress>(peer);
    encoder.append::<Data>(payload);
    encoder.flush(None).unwrap();

    let mut decoder = Decoder::default();
    let message = decoder.decode(&buf).unwrap();

    assert_eq!(message.method(), SEND_INDICATION);
    assert_eq!(message.get::<XorPeerAddress>(), Some(peer));
    assert_eq!(message.get::<Data>(), Some(&payload[..]));
}

#[test]
fn allocate_response_exposes_relayed_address() {
    let token = *b"alloc0resp01";
    let relayed = "198.51.100.4:55616".parse().unwrap();

    let mut buf = BytesMut::new();
    let mut encoder = MessageEncoder::new(ALLOCATE_RESPONSE, &token, &mut buf);
    encoder.append::<XorRelayedAddress>(relayed);
    encoder.flush(None).unwrap();

    let mut decoder = Decoder::default();
    let message = decoder.decode(&buf).unwrap();

    assert_eq!(message.get::<XorRelayedAddress>(), Some(relayed));
}

#[test]
fn connectivity_check_carries_ice_attributes() {
    let token = *b"ice0check001";

    let mut buf = BytesMut::new();
    let mut encoder = MessageEncoder::new(BINDING_REQUEST, &token, &mut buf);
    encoder.append::<Priority>(1853759231);
    encoder.append::<IceControlling>(0xdead_beef_1234_5678);
    encoder.append::<UseCandidate>(());
    encoder.flush(None).unwrap();

    let mut decoder = Decoder::default();
    let message = decoder.decode(&buf).unwrap();

    assert_eq!(message.get::<Priority>(), Some(1853759231));
    assert_eq!(message.get::<IceControlling>(), Some(0xdead_beef_1234_5678));
    assert!(message.get::<UseCandidate>().is_some());
}
